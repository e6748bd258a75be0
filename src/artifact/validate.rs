//! Content validators for artifacts and cached payloads

use std::fmt;
use std::str::FromStr;

/// A check run against candidate content before it is committed.
///
/// Implemented by [`Validator`] and by any `Fn(&[u8]) -> bool` predicate.
pub trait Validate {
    /// `Ok(())` if the content may be committed, otherwise the reason
    fn validate(&self, content: &[u8]) -> Result<(), String>;
}

impl<F> Validate for F
where
    F: Fn(&[u8]) -> bool,
{
    fn validate(&self, content: &[u8]) -> Result<(), String> {
        if self(content) {
            Ok(())
        } else {
            Err("rejected by validator".to_string())
        }
    }
}

/// Built-in content formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validator {
    /// Well-formed JSON document
    Json,
    /// Well-formed TOML document
    Toml,
    /// Well-formed SVG document without scripts or event handlers
    Svg,
    /// Anything with at least one non-whitespace byte
    NonEmpty,
}

impl Validator {
    /// Guess a validator from a file extension, defaulting to `NonEmpty`
    pub fn for_path(path: &std::path::Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::Json,
            Some("toml") => Self::Toml,
            Some("svg") => Self::Svg,
            _ => Self::NonEmpty,
        }
    }
}

impl Validate for Validator {
    fn validate(&self, content: &[u8]) -> Result<(), String> {
        match self {
            Self::Json => serde_json::from_slice::<serde::de::IgnoredAny>(content)
                .map(|_| ())
                .map_err(|e| format!("invalid JSON: {}", e)),
            Self::Toml => {
                let text = utf8(content)?;
                text.parse::<toml::Table>()
                    .map(|_| ())
                    .map_err(|e| format!("invalid TOML: {}", e))
            }
            Self::Svg => check_svg(utf8(content)?),
            Self::NonEmpty => {
                if content.iter().all(u8::is_ascii_whitespace) {
                    Err("content is empty".to_string())
                } else {
                    Ok(())
                }
            }
        }
    }
}

fn utf8(content: &[u8]) -> Result<&str, String> {
    std::str::from_utf8(content).map_err(|e| format!("not UTF-8: {}", e))
}

/// Elements an SVG card may never contain
const FORBIDDEN_ELEMENTS: [&str; 2] = ["script", "foreignObject"];

/// A well-formed XML document rooted at `<svg>`, with no script elements and
/// no event handler attributes (`onload`, `onclick`, ...)
fn check_svg(text: &str) -> Result<(), String> {
    let options = roxmltree::ParsingOptions {
        allow_dtd: true,
        ..roxmltree::ParsingOptions::default()
    };
    let doc = roxmltree::Document::parse_with_options(text.trim_start(), options)
        .map_err(|e| format!("malformed SVG: {}", e))?;

    let root = doc.root_element();
    if root.tag_name().name() != "svg" {
        return Err(format!(
            "root element is <{}>, expected <svg>",
            root.tag_name().name()
        ));
    }

    for node in root.descendants().filter(|n| n.is_element()) {
        let tag = node.tag_name().name();
        if FORBIDDEN_ELEMENTS
            .iter()
            .any(|forbidden| tag.eq_ignore_ascii_case(forbidden))
        {
            return Err(format!("forbidden element <{}>", tag.to_ascii_lowercase()));
        }

        if let Some(attr) = node.attributes().find(|a| is_event_handler(a.name())) {
            return Err(format!(
                "forbidden event handler {} on <{}>",
                attr.name(),
                tag
            ));
        }
    }

    Ok(())
}

fn is_event_handler(attr: &str) -> bool {
    attr.len() > 2 && attr.get(..2).is_some_and(|prefix| prefix.eq_ignore_ascii_case("on"))
}

impl fmt::Display for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Json => "json",
            Self::Toml => "toml",
            Self::Svg => "svg",
            Self::NonEmpty => "non-empty",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for Validator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "toml" => Ok(Self::Toml),
            "svg" => Ok(Self::Svg),
            "non-empty" | "nonempty" | "text" => Ok(Self::NonEmpty),
            other => Err(format!(
                "unknown validator '{}' (expected json, toml, svg or non-empty)",
                other
            )),
        }
    }
}
