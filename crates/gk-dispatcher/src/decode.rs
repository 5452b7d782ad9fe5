//! Decodes a raw delivery body into a `Request`, distinguishing
//! malformed payloads (nack-no-requeue) from payloads whose `status`
//! is recognized but simply isn't one the core understands yet
//! (ack with no side effects, forward-compatible no-op).

use gk_common::Request;

pub enum Decoded {
    Known(Request),
    UnknownStatus,
}

const KNOWN_STATUSES: &[&str] = &["Pending", "Approved", "Denied", "Banned", "Deactivated"];

pub fn decode_delivery(body: &[u8]) -> Result<Decoded, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_slice(body)?;

    let status_is_known = value
        .get("status")
        .and_then(|s| s.as_str())
        .is_some_and(|s| KNOWN_STATUSES.contains(&s));

    if !status_is_known {
        return Ok(Decoded::UnknownStatus);
    }

    let request: Request = serde_json::from_value(value)?;
    Ok(Decoded::Known(request))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_json(status: &str) -> String {
        format!(
            r#"{{
                "id": "r1",
                "username": "bob",
                "contact": "bob@example.test",
                "age": 20,
                "gender": "male",
                "applicationText": "",
                "status": "{status}",
                "onServerStatus": "None",
                "createdAt": "2026-01-01T00:00:00Z",
                "decisionAt": null,
                "lastUpdateAt": null,
                "decidedBy": null
            }}"#
        )
    }

    #[test]
    fn decodes_a_recognized_status() {
        let decoded = decode_delivery(request_json("Pending").as_bytes()).unwrap();
        assert!(matches!(decoded, Decoded::Known(_)));
    }

    #[test]
    fn treats_unrecognized_status_as_a_quiet_no_op() {
        let decoded = decode_delivery(request_json("Archived").as_bytes()).unwrap();
        assert!(matches!(decoded, Decoded::UnknownStatus));
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(decode_delivery(b"not json").is_err());
    }

    #[test]
    fn rejects_missing_status_field() {
        assert!(matches!(
            decode_delivery(b"{\"id\": \"r1\"}").unwrap(),
            Decoded::UnknownStatus
        ));
    }
}
