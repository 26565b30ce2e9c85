//! Embed snippets tenants paste into their own websites.

use serde::Serialize;
use uuid::Uuid;

use crate::database::Customer;

pub const DEFAULT_WIDGET_TITLE: &str = "Maintenance Plans";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EmbedSnippets {
    pub widget_url: String,
    pub script: String,
    pub iframe: String,
}

pub fn widget_url(base_url: &str, tenant_id: Uuid) -> String {
    format!("{base_url}/widget/{tenant_id}")
}

pub fn snippets(base_url: &str, customer: &Customer) -> EmbedSnippets {
    let title = escape_html(
        customer
            .widget_title
            .as_deref()
            .unwrap_or(DEFAULT_WIDGET_TITLE),
    );
    let url = widget_url(base_url, customer.id);

    EmbedSnippets {
        script: format!(
            r#"<div id="serviceplan-widget" data-tenant="{id}"></div>
<script src="{base_url}/widget.js" data-tenant="{id}" data-title="{title}" async></script>"#,
            id = customer.id,
        ),
        iframe: format!(
            r#"<iframe src="{url}" title="{title}" width="100%" height="640" style="border:0" loading="lazy"></iframe>"#
        ),
        widget_url: url,
    }
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant(title: Option<&str>) -> Customer {
        let mut customer =
            Customer::new("a@b.co".into(), "Pat".into(), "Green Lawns".into(), "h".into());
        customer.widget_title = title.map(str::to_string);
        customer
    }

    #[test]
    fn test_snippets_point_at_tenant_widget() {
        let customer = tenant(None);
        let s = snippets("https://app.example.com", &customer);
        assert_eq!(s.widget_url, format!("https://app.example.com/widget/{}", customer.id));
        assert!(s.iframe.contains(&s.widget_url));
        assert!(s.script.contains("https://app.example.com/widget.js"));
        assert!(s.script.contains(&format!("data-tenant=\"{}\"", customer.id)));
        assert!(s.iframe.contains(DEFAULT_WIDGET_TITLE));
    }

    #[test]
    fn test_title_is_escaped() {
        let customer = tenant(Some(r#"Bob's "Best" <Plans>"#));
        let s = snippets("https://app.example.com", &customer);
        assert!(s.iframe.contains("Bob&#39;s &quot;Best&quot; &lt;Plans&gt;"));
        assert!(!s.script.contains("<Plans>"));
    }
}
