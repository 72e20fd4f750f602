use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::Value;
use crate::{sync, tokenizer::is_void_tag};

#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: String,
    /// `None` for bare attributes.
    pub value: Option<Value>,
}

#[derive(Debug, Clone)]
pub enum Child {
    Element(Arc<Element>),
    Text { content: String, escaped: bool },
}

/// An HTML fragment. Rendering escapes attribute values and escaped text.
#[derive(Debug)]
pub struct Element {
    pub tag: String,
    pub self_closing: bool,
    attrs: RwLock<Vec<Attribute>>,
    children: RwLock<Vec<Child>>,
}

impl Element {
    pub fn new(tag: String, attrs: Vec<Attribute>, children: Vec<Child>, self_closing: bool) -> Self {
        Self {
            tag,
            self_closing,
            attrs: RwLock::new(attrs),
            children: RwLock::new(children),
        }
    }

    pub fn attrs(&self) -> RwLockReadGuard<'_, Vec<Attribute>> {
        sync::read(&self.attrs)
    }

    pub fn attrs_mut(&self) -> RwLockWriteGuard<'_, Vec<Attribute>> {
        sync::write(&self.attrs)
    }

    pub fn children(&self) -> RwLockReadGuard<'_, Vec<Child>> {
        sync::read(&self.children)
    }

    pub fn get_attribute(&self, name: &str) -> Option<Value> {
        let name = kebab_case(name);
        self.attrs()
            .iter()
            .find(|attr| attr.name == name)
            .map(|attr| attr.value.clone().unwrap_or_else(|| Value::string("")))
    }

    pub fn set_attribute(&self, name: &str, value: Value) {
        let name = kebab_case(name);
        let mut attrs = self.attrs_mut();
        match attrs.iter_mut().find(|attr| attr.name == name) {
            Some(attr) => attr.value = Some(value),
            None => attrs.push(Attribute {
                name,
                value: Some(value),
            }),
        }
    }

    pub fn remove_attribute(&self, name: &str) -> bool {
        let name = kebab_case(name);
        let mut attrs = self.attrs_mut();
        let before = attrs.len();
        attrs.retain(|attr| attr.name != name);
        attrs.len() != before
    }

    pub fn deep_clone(&self) -> Self {
        let attrs = self
            .attrs()
            .iter()
            .map(|attr| Attribute {
                name: attr.name.clone(),
                value: attr.value.as_ref().map(Value::deep_clone),
            })
            .collect();
        let children = self
            .children()
            .iter()
            .map(|child| match child {
                Child::Element(element) => Child::Element(Arc::new(element.deep_clone())),
                text => text.clone(),
            })
            .collect();
        Self::new(self.tag.clone(), attrs, children, self.self_closing)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out);
        out
    }

    fn render_into(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.tag);

        let attrs = self.attrs();
        for attr in attrs.iter() {
            let value = attr
                .value
                .as_ref()
                .map(|value| escape(&value.to_string()))
                .unwrap_or_default();

            if self.tag == "a" && attr.name == "n-to" {
                out.push_str(&format!(" href=\"{value}\" n-to=\"\""));
                continue;
            }
            out.push_str(&format!(" {}=\"{value}\"", attr.name));
        }

        if self.self_closing {
            if !attrs.is_empty() {
                out.push(' ');
            }
            out.push_str("/>");
            return;
        }
        out.push('>');
        if is_void_tag(&self.tag) {
            return;
        }

        for child in self.children().iter() {
            match child {
                Child::Element(element) => element.render_into(out),
                Child::Text {
                    content,
                    escaped: true,
                } => out.push_str(&escape(content)),
                Child::Text { content, .. } => out.push_str(content),
            }
        }

        out.push_str("</");
        out.push_str(&self.tag);
        out.push('>');
    }
}

/// `&`, `<`, `>`, `"` and `'` become entities.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// `dataValue` and `data_value` both become `data-value`.
pub fn kebab_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut previous: Option<char> = None;
    for c in name.chars() {
        match c {
            '_' | ' ' => {
                if !out.ends_with('-') && !out.is_empty() {
                    out.push('-');
                }
            }
            c if c.is_uppercase() => {
                if previous.is_some_and(|p| p.is_lowercase() || p.is_ascii_digit()) {
                    out.push('-');
                }
                out.extend(c.to_lowercase());
            }
            c => out.push(c),
        }
        previous = Some(c);
    }
    out
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    fn text(content: &str, escaped: bool) -> Child {
        Child::Text {
            content: content.into(),
            escaped,
        }
    }

    #[test]
    fn test_render_attributes_and_text() {
        let element = Element::new(
            "div".into(),
            vec![Attribute {
                name: "id".into(),
                value: Some(Value::Int(4)),
            }],
            vec![text("Hello", true)],
            false,
        );
        assert_eq!(element.render(), "<div id=\"4\">Hello</div>");
    }

    #[test]
    fn test_navigation_attribute_becomes_href() {
        let element = Element::new(
            "a".into(),
            vec![Attribute {
                name: "n-to".into(),
                value: Some(Value::string("/x")),
            }],
            vec![text("go", true)],
            false,
        );
        assert_eq!(element.render(), "<a href=\"/x\" n-to=\"\">go</a>");
    }

    #[test]
    fn test_escaping() {
        let element = Element::new(
            "p".into(),
            vec![],
            vec![text("a < b", true), text("<b>!</b>", false)],
            false,
        );
        assert_eq!(element.render(), "<p>a &lt; b<b>!</b></p>");
    }

    #[test]
    fn test_void_and_self_closing() {
        let br = Element::new("br".into(), vec![], vec![], false);
        assert_eq!(br.render(), "<br>");
        let input = Element::new(
            "input".into(),
            vec![Attribute {
                name: "disabled".into(),
                value: None,
            }],
            vec![],
            true,
        );
        assert_eq!(input.render(), "<input disabled=\"\" />");
    }

    #[test]
    fn test_kebab_case() {
        assert_eq!(kebab_case("dataValue"), "data-value");
        assert_eq!(kebab_case("data_value"), "data-value");
        assert_eq!(kebab_case("n-to"), "n-to");
        assert_eq!(kebab_case("class"), "class");
    }

    #[test]
    fn test_attribute_updates() {
        let element = Element::new("div".into(), vec![], vec![], false);
        element.set_attribute("dataId", Value::Int(1));
        element.set_attribute("data-id", Value::Int(2));
        assert_eq!(element.get_attribute("data-id"), Some(Value::Int(2)));
        assert!(element.remove_attribute("dataId"));
        assert_eq!(element.get_attribute("data-id"), None);
    }
}
