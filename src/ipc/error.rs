use serde::Serialize;

/// Failure payload of a response line. `details` is omitted when empty.
#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    code: &'a str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Envelope<'a> {
    Ok {
        id: &'a str,
        ok: bool,
        result: serde_json::Value,
    },
    Err {
        id: &'a str,
        ok: bool,
        error: ErrorBody<'a>,
    },
}

fn to_value(envelope: Envelope<'_>) -> serde_json::Value {
    serde_json::to_value(envelope).unwrap_or(serde_json::Value::Null)
}

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    to_value(Envelope::Ok {
        id,
        ok: true,
        result,
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    to_value(Envelope::Err {
        id,
        ok: false,
        error: ErrorBody {
            code,
            message: message.into(),
            details,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_line_omits_missing_details() {
        assert_eq!(
            err("7", "not_found", "student not found", None),
            json!({
                "id": "7",
                "ok": false,
                "error": { "code": "not_found", "message": "student not found" }
            })
        );
        let with = err("8", "conflict", "taken", Some(json!({ "rollNo": "12" })));
        assert_eq!(with["error"]["details"]["rollNo"], "12");
        assert_eq!(ok("9", json!({ "n": 1 }))["result"]["n"], 1);
    }
}
