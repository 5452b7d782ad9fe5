//! The minimal `{{field}}` placeholder substitution the original
//! templates for this system have always used: no conditionals, no
//! loops, just literal key lookups against the supplied data map.

use std::collections::HashMap;

pub fn render(html: &str, data: &HashMap<String, String>) -> String {
    let mut rendered = html.to_string();
    for (key, value) in data {
        rendered = rendered.replace(&format!("{{{{{key}}}}}"), value);
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_every_known_placeholder() {
        let mut data = HashMap::new();
        data.insert("username".to_string(), "alice".to_string());
        data.insert("link".to_string(), "https://example.test/t".to_string());

        let rendered = render("<p>Hi {{username}}, confirm at {{link}}</p>", &data);
        assert_eq!(rendered, "<p>Hi alice, confirm at https://example.test/t</p>");
    }

    #[test]
    fn leaves_unknown_placeholders_untouched() {
        let data = HashMap::new();
        let rendered = render("<p>{{missing}}</p>", &data);
        assert_eq!(rendered, "<p>{{missing}}</p>");
    }
}
