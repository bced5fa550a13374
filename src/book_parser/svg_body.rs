//! 页面正文（SVG）解析：提取子资源引用、截取根元素。

use std::collections::HashSet;

use roxmltree::{Document, Node};

use crate::download::models::ResourceRef;

const XLINK_NS: &str = "http://www.w3.org/1999/xlink";

fn image_href<'a>(node: &Node<'a, '_>) -> Option<&'a str> {
    node.attribute((XLINK_NS, "href"))
        .or_else(|| node.attribute("href"))
}

/// 按正文中出现顺序返回所有 `image` 引用，重复引用只保留第一次。
/// 已内联的 `data:` URI 与空引用被跳过。
pub fn collect_resource_refs(src: &str) -> Result<Vec<ResourceRef>, roxmltree::Error> {
    let doc = Document::parse(src)?;
    let mut seen = HashSet::new();
    let mut refs = Vec::new();
    for node in doc
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "image")
    {
        let Some(href) = image_href(&node) else {
            continue;
        };
        let href = href.trim();
        if href.is_empty() || href.starts_with("data:") {
            continue;
        }
        if seen.insert(href) {
            refs.push(href.to_string());
        }
    }
    Ok(refs)
}

#[derive(Debug, thiserror::Error)]
pub enum SvgRootError {
    #[error("malformed svg: {0}")]
    Parse(#[from] roxmltree::Error),
    #[error("root element is <{0}>, expected <svg>")]
    NotSvg(String),
}

/// 截取 `<svg>` 根元素的原始标记（去掉 XML 声明、DOCTYPE、注释），用于内联到 XHTML。
pub fn svg_root_markup(src: &str) -> Result<&str, SvgRootError> {
    let doc = Document::parse(src)?;
    let root = doc.root_element();
    if root.tag_name().name() != "svg" {
        return Err(SvgRootError::NotSvg(root.tag_name().name().to_string()));
    }
    Ok(&src[root.range()])
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" width="909" height="1286">
  <image xlink:href="img/a.png" x="0" y="0" width="10" height="10"/>
  <g><image href="img/b.jpg"/></g>
  <image xlink:href="img/a.png"/>
  <image xlink:href="data:image/png;base64,AAAA"/>
</svg>"#;

    #[test]
    fn refs_keep_document_order_and_collapse_duplicates() {
        let refs = collect_resource_refs(PAGE).unwrap();
        assert_eq!(refs, vec!["img/a.png", "img/b.jpg"]);
    }

    #[test]
    fn malformed_body_is_an_error() {
        assert!(collect_resource_refs("<svg><image href='x'></svg>").is_err());
    }

    #[test]
    fn root_markup_drops_prolog() {
        let markup = svg_root_markup(PAGE).unwrap();
        assert!(markup.starts_with("<svg"));
        assert!(markup.ends_with("</svg>"));
    }

    #[test]
    fn non_svg_root_is_rejected() {
        let err = svg_root_markup("<html></html>").unwrap_err();
        assert!(matches!(err, SvgRootError::NotSvg(name) if name == "html"));
    }
}
