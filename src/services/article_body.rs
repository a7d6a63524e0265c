//! Locates the article body in a news page.
//!
//! Boilerplate subtrees (scripts, navigation, footers, ad and promo blocks)
//! are left out. The body is found with per-site selectors, then generic
//! ones, then `<body>`. The result is a cleaned HTML fragment for text
//! rendering.

use std::fmt::Write;

use scraper::{ElementRef, Html, Node, Selector};
use url::Url;

use crate::error::{AppError, Result};

const SKIPPED_TAGS: &[&str] = &[
    "script", "style", "nav", "header", "footer", "aside", "iframe", "noscript", "form",
];

/// Matched as whole words of a class name (`ads`, `c-ads__slot`, `promo-box`).
const SKIPPED_CLASS_WORDS: &[&str] = &["ads", "advertisement", "promo", "comments"];

/// Matched anywhere in a class name.
const SKIPPED_CLASS_PARTS: &[&str] = &["social-share", "newsletter-signup", "related-articles"];

/// A selector whose matches carry fewer characters than this is only used
/// when nothing better turns up.
const MIN_BODY_CHARS: usize = 200;

const SITE_SELECTORS: &[(&str, &[&str])] = &[
    (
        "deadline.com",
        &[
            ".c-content__body",
            ".entry-content",
            ".post-content",
            "article .content",
            "[class*=\"article-body\"]",
            "[class*=\"article-content\"]",
        ],
    ),
    (
        "variety.com",
        &[
            ".c-content",
            ".o-article-detail__content",
            ".entry-content",
            "article .content",
        ],
    ),
    (
        "hollywoodreporter.com",
        &[".a-article-body", ".c-content", ".entry-content", "article .content"],
    ),
];

const GENERIC_SELECTORS: &[&str] = &[
    "article",
    "[role=\"main\"]",
    ".entry-content",
    ".post-content",
    ".article-content",
    ".article-body",
    ".content",
];

pub struct BodySelector {
    sites: Vec<(&'static str, Vec<Selector>)>,
    generic: Vec<Selector>,
    body: Selector,
}

/// Boilerplate-free HTML of the matched elements and the length of their text.
#[derive(Debug, Default)]
struct Fragment {
    html: String,
    text_chars: usize,
}

impl BodySelector {
    pub fn new() -> Result<Self> {
        let sites = SITE_SELECTORS
            .iter()
            .map(|(domain, selectors)| compile(selectors).map(|compiled| (*domain, compiled)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            sites,
            generic: compile(GENERIC_SELECTORS)?,
            body: parse_selector("body")?,
        })
    }

    /// The article body of `html` as a cleaned fragment, or `None` when the
    /// page has no text at all.
    pub fn select(&self, html: &str, url: &str) -> Option<String> {
        let document = Html::parse_document(html);
        let host = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_lowercase))
            .unwrap_or_default();

        let selectors = self
            .sites
            .iter()
            .find(|(domain, _)| host == *domain || host.ends_with(&format!(".{domain}")))
            .map(|(_, selectors)| selectors)
            .unwrap_or(&self.generic);

        let mut best: Option<Fragment> = None;
        for selector in selectors {
            let mut fragment = Fragment::default();
            for element in document.select(selector) {
                fragment.push(element);
            }
            if fragment.text_chars == 0 {
                continue;
            }
            let complete = fragment.text_chars > MIN_BODY_CHARS;
            best = Some(fragment);
            if complete {
                break;
            }
        }

        let fragment = match best {
            Some(fragment) if fragment.text_chars > MIN_BODY_CHARS => fragment,
            partial => {
                tracing::debug!(%host, "No article selector matched, using page body");
                let mut body = Fragment::default();
                if let Some(element) = document.select(&self.body).next() {
                    body.push(element);
                }
                if body.text_chars > 0 {
                    body
                } else {
                    partial?
                }
            }
        };

        Some(fragment.html)
    }
}

impl Fragment {
    fn push(&mut self, element: ElementRef<'_>) {
        if is_boilerplate(element) {
            return;
        }
        self.html.push_str("<div>");
        self.render(element);
        self.html.push_str("</div>");
    }

    /// Re-serialize the children of `element`, dropping boilerplate subtrees
    /// and every attribute.
    fn render(&mut self, element: ElementRef<'_>) {
        for child in element.children() {
            match child.value() {
                Node::Text(text) => {
                    self.text_chars += text.trim().chars().count();
                    self.html.push_str(&escape(text));
                }
                Node::Element(_) => {
                    let Some(child) = ElementRef::wrap(child) else {
                        continue;
                    };
                    if is_boilerplate(child) {
                        continue;
                    }
                    let name = child.value().name();
                    let _ = write!(self.html, "<{name}>");
                    self.render(child);
                    let _ = write!(self.html, "</{name}>");
                }
                _ => {}
            }
        }
    }
}

fn is_boilerplate(element: ElementRef<'_>) -> bool {
    let el = element.value();
    if SKIPPED_TAGS.contains(&el.name()) {
        return true;
    }
    el.classes().any(|class| {
        let class = class.to_lowercase();
        SKIPPED_CLASS_PARTS.iter().any(|part| class.contains(part))
            || class
                .split(|c: char| c == '-' || c == '_')
                .any(|word| SKIPPED_CLASS_WORDS.contains(&word))
    })
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn compile(selectors: &[&str]) -> Result<Vec<Selector>> {
    selectors.iter().map(|s| parse_selector(s)).collect()
}

fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector)
        .map_err(|e| AppError::Config(format!("invalid selector {selector:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paragraph(words: usize) -> String {
        (0..words).map(|i| format!("word{i}")).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn site_selector_picks_body_and_drops_boilerplate() {
        let html = format!(
            r#"<html><body>
              <header>Site Header Menu</header>
              <nav>Film TV Awards</nav>
              <div class="c-content__body">
                <p>{}</p>
                <script>trackPageView()</script>
                <div class="newsletter-signup">Get the daily email</div>
                <div class="c-ads__slot">Advertisement</div>
                <p>Second &amp; final paragraph.</p>
              </div>
              <footer>Copyright Footer</footer>
            </body></html>"#,
            paragraph(40)
        );

        let fragment = BodySelector::new()
            .unwrap()
            .select(&html, "https://deadline.com/2025/06/story/")
            .unwrap();

        assert!(fragment.contains("word39"));
        assert!(fragment.contains("Second &amp; final paragraph."));
        for noise in ["Site Header", "Film TV", "trackPageView", "daily email", "Advertisement", "Copyright"] {
            assert!(!fragment.contains(noise), "{noise} leaked into the body");
        }
    }

    #[test]
    fn unknown_sites_use_generic_selectors() {
        let html = format!(
            "<html><body><div>Sidebar teaser</div><article><p>{}</p></article></body></html>",
            paragraph(50)
        );
        let fragment = BodySelector::new()
            .unwrap()
            .select(&html, "https://news.example.org/story")
            .unwrap();
        assert!(fragment.contains("word0"));
        assert!(!fragment.contains("Sidebar"));
    }

    #[test]
    fn short_matches_fall_back_to_page_body() {
        let html = format!(
            r#"<html><body><div class="c-content__body">Teaser</div><div><p>{}</p></div></body></html>"#,
            paragraph(50)
        );
        let fragment = BodySelector::new()
            .unwrap()
            .select(&html, "https://deadline.com/x/")
            .unwrap();
        assert!(fragment.contains("word49"));
    }

    #[test]
    fn class_words_do_not_match_inside_longer_words() {
        let html = format!(
            r#"<html><body><article class="story-threads"><p>{}</p></article></body></html>"#,
            paragraph(50)
        );
        let fragment = BodySelector::new()
            .unwrap()
            .select(&html, "https://news.example.org/story")
            .unwrap();
        assert!(fragment.contains("word10"));
    }

    #[test]
    fn empty_page_has_no_body() {
        let selector = BodySelector::new().unwrap();
        assert!(selector.select("<html><body></body></html>", "https://deadline.com/").is_none());
    }
}
