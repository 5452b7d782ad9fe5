//! Pure string-building for remote-console commands and mail
//! subjects/links, kept out of the async handlers so the exact
//! wording is independently testable.

use gk_token::TokenCodec;

pub fn whitelist_add(username: &str) -> String {
    format!("whitelist add {username}")
}

pub fn whitelist_remove(username: &str) -> String {
    format!("whitelist remove {username}")
}

pub fn ban(username: &str) -> String {
    format!("ban {username}")
}

pub const CONFIRMATION_SUBJECT: &str = "Your request to join the server has been received";
pub const APPROVED_SUBJECT: &str = "Your request to join the server is approved";
pub const DENIED_SUBJECT: &str = "Update regarding your request to join the server";

pub fn operator_action_subject(username: &str) -> String {
    format!("[Action Required] Whitelist request from {username}")
}

/// The link embedded in the user-facing confirmation/decision mail:
/// just the encoded request id.
pub fn decision_link(token: &TokenCodec, request_id: &str) -> String {
    token.encode(request_id)
}

/// The link embedded in an operator's action mail: the encoded
/// request id plus an `adm` query parameter identifying the
/// operator, so the click-through endpoint knows who decided.
pub fn operator_action_link(token: &TokenCodec, request_id: &str, operator: &str) -> String {
    format!("{}?adm={}", token.encode(request_id), token.encode(operator))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rcon_commands_embed_the_username_verbatim() {
        assert_eq!(whitelist_add("alice"), "whitelist add alice");
        assert_eq!(whitelist_remove("alice"), "whitelist remove alice");
        assert_eq!(ban("alice"), "ban alice");
    }

    #[test]
    fn operator_action_link_carries_both_encoded_ids() {
        let token = TokenCodec::new("pw").unwrap();
        let link = operator_action_link(&token, "req1", "op1");
        let mut parts = link.splitn(2, "?adm=");
        let request_part = parts.next().unwrap();
        let operator_part = parts.next().unwrap();
        assert_eq!(token.decode(request_part).unwrap(), "req1");
        assert_eq!(token.decode(operator_part).unwrap(), "op1");
    }
}
