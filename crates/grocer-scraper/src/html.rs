//! DOM traversal primitives for server-rendered catalog pages.
//!
//! All lookups walk the tree depth-first in pre-order, starting with (and
//! including) the scope element. An element matches a `(tag, class)` query
//! when its tag name equals `tag` and its `class` attribute contains `class`
//! as a substring, so stacked modifiers like `catalog-item catalog-item--sale`
//! still match `catalog-item`.
//!
//! `scraper::Html` is not `Send`; parse and extract inside synchronous code
//! and only hand owned values back to async callers.

use scraper::{ElementRef, Html};

/// Class token marking the current page inside a pagination widget.
const ACTIVE_MARKER: &str = "active";

/// A parsed HTML document.
pub struct Document {
    html: Html,
}

impl Document {
    #[must_use]
    pub fn parse(markup: &str) -> Self {
        Self {
            html: Html::parse_document(markup),
        }
    }

    #[must_use]
    pub fn root(&self) -> ElementRef<'_> {
        self.html.root_element()
    }

    #[must_use]
    pub fn find_first(&self, tag: &str, class: &str) -> Option<ElementRef<'_>> {
        find_first(self.root(), tag, class)
    }

    #[must_use]
    pub fn find_all(&self, tag: &str, class: &str) -> Vec<ElementRef<'_>> {
        find_all(self.root(), tag, class)
    }
}

#[must_use]
pub fn matches(element: &ElementRef<'_>, tag: &str, class: &str) -> bool {
    let value = element.value();
    if value.name() != tag {
        return false;
    }
    class.is_empty() || value.attr("class").is_some_and(|c| c.contains(class))
}

fn pre_order<'a>(scope: ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> {
    scope.descendants().filter_map(ElementRef::wrap)
}

#[must_use]
pub fn find_first<'a>(scope: ElementRef<'a>, tag: &str, class: &str) -> Option<ElementRef<'a>> {
    pre_order(scope).find(|el| matches(el, tag, class))
}

#[must_use]
pub fn find_all<'a>(scope: ElementRef<'a>, tag: &str, class: &str) -> Vec<ElementRef<'a>> {
    pre_order(scope)
        .filter(|el| matches(el, tag, class))
        .collect()
}

/// Concatenation of every trimmed text node under `element`, trimmed.
#[must_use]
pub fn text(element: ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .collect::<String>()
        .trim()
        .to_owned()
}

/// `href` of the first `<a>` in the subtree that has one.
#[must_use]
pub fn href(element: ElementRef<'_>) -> Option<String> {
    pre_order(element)
        .filter(|el| el.value().name() == "a")
        .find_map(|el| el.value().attr("href"))
        .map(str::to_owned)
}

/// Value of `attr` on the first `(tag, class)` match that carries a
/// non-empty `attr`.
#[must_use]
pub fn attr_value(scope: ElementRef<'_>, tag: &str, class: &str, attr: &str) -> Option<String> {
    pre_order(scope)
        .filter(|el| matches(el, tag, class))
        .find_map(|el| el.value().attr(attr).filter(|v| !v.is_empty()))
        .map(str::to_owned)
}

/// Tag/class pairs locating a numbered pagination widget.
#[derive(Debug, Clone, Copy)]
pub struct PaginationWidget<'a> {
    pub list_tag: &'a str,
    pub list_class: &'a str,
    pub item_tag: &'a str,
    pub item_class: &'a str,
}

fn is_active(element: &ElementRef<'_>) -> bool {
    element
        .value()
        .attr("class")
        .is_some_and(|c| c.split_whitespace().any(|token| token == ACTIVE_MARKER))
}

/// Next page number after the active one, or `None` when the active page is
/// the last one or the widget is absent.
///
/// The second-to-last item holds the highest page number (the last is the
/// "next" arrow).
#[must_use]
pub fn next_page(scope: ElementRef<'_>, widget: &PaginationWidget<'_>) -> Option<u32> {
    let list = find_first(scope, widget.list_tag, widget.list_class)?;
    let items = find_all(list, widget.item_tag, widget.item_class);
    if items.len() < 2 {
        return None;
    }
    let max_page = text(items[items.len() - 2]).parse::<u32>().ok()?;
    let current = items.iter().find(|item| is_active(item))?;
    let current_page = text(*current).parse::<u32>().ok()?;
    (current_page < max_page).then_some(current_page + 1)
}

#[cfg(test)]
#[path = "html_test.rs"]
mod tests;
