//! Hierarchy XML for the Weave client.
//!
//! Each category renders as
//!
//! ```text
//! <category title="{T}" weaveEntityId="{E}" >
//! <attribute title="{t}" dataType="{d}" weaveEntityId="{w}" object_id="{o}"/>
//! </category>
//! ```
//!
//! followed by a newline. Attributes keep insertion order. Attribute values
//! are XML-escaped (`&`, `<`, `>`, `"`); that is the only difference from the
//! raw format the Weave client was first fed, and values without those
//! characters render byte-for-byte the same.

use std::fmt::Write;

use crate::error::{Result, WeaveError};
use crate::store::WeaveStore;
use crate::types::{attr, HierarchyItem};
use crate::{hierarchy, metadata};

/// Entity id stamped on categories built by [`render_custom_hierarchy`].
pub const CUSTOM_CATEGORY_ENTITY_ID: u64 = 99999;

/// Stand-in for a missing `object_id`.
pub const DEFAULT_OBJECT_ID: &str = "0000";

/// One `<category>` element and its `<attribute>` children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeaveXmlSet {
    title: String,
    weave_entity_id: u64,
    attributes: Vec<XmlAttribute>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct XmlAttribute {
    title: String,
    datatype: String,
    weave_entity_id: u64,
    object_id: String,
}

impl WeaveXmlSet {
    pub fn new(title: impl Into<String>, weave_entity_id: u64) -> Self {
        Self {
            title: title.into(),
            weave_entity_id,
            attributes: Vec::new(),
        }
    }

    /// Missing `weave_entity_id` renders as `0`; a missing or empty
    /// `object_id` renders as `0000`.
    pub fn add_attribute(&mut self, item: HierarchyItem) {
        let object_id = item
            .object_id
            .filter(|o| !o.is_empty())
            .unwrap_or_else(|| DEFAULT_OBJECT_ID.to_string());
        self.attributes.push(XmlAttribute {
            title: item.title,
            datatype: item.datatype,
            weave_entity_id: item.weave_entity_id.unwrap_or(0),
            object_id,
        });
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn render(&self) -> Result<String> {
        let mut xml = String::new();
        writeln!(
            xml,
            r#"<category title="{}" weaveEntityId="{}" >"#,
            xml_escape(&self.title),
            self.weave_entity_id
        )
        .map_err(fmt_error)?;
        for attribute in &self.attributes {
            writeln!(
                xml,
                r#"<attribute title="{}" dataType="{}" weaveEntityId="{}" object_id="{}"/>"#,
                xml_escape(&attribute.title),
                xml_escape(&attribute.datatype),
                attribute.weave_entity_id,
                xml_escape(&attribute.object_id)
            )
            .map_err(fmt_error)?;
        }
        writeln!(xml, "</category>").map_err(fmt_error)?;
        Ok(xml)
    }
}

/// Render one category per distinct hierarchy parent, parents ascending.
///
/// A parent without a public `title`, or a child without `title` or
/// `dataType`, aborts rendering with `NotFound`.
pub async fn render_full_hierarchy(store: &dyn WeaveStore) -> Result<String> {
    let mut out = String::new();
    for parent_id in hierarchy::distinct_parents(store).await? {
        let title = metadata::required_public_value(store, parent_id, attr::TITLE).await?;
        let mut set = WeaveXmlSet::new(title, parent_id.0);
        for item in metadata::hierarchy_items(store, parent_id).await? {
            set.add_attribute(item);
        }
        out.push_str(&set.render()?);
    }
    Ok(out)
}

/// Render a single synthetic category from caller-supplied items without
/// touching the store.
pub fn render_custom_hierarchy<I>(title: &str, items: I) -> Result<String>
where
    I: IntoIterator<Item = HierarchyItem>,
{
    let mut set = WeaveXmlSet::new(title, CUSTOM_CATEGORY_ENTITY_ID);
    for item in items {
        set.add_attribute(item);
    }
    set.render()
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn fmt_error(err: std::fmt::Error) -> WeaveError {
    WeaveError::Storage(anyhow::Error::new(err).context("rendering hierarchy xml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_hierarchy_exact_shape() {
        let xml = render_custom_hierarchy("Demo", [HierarchyItem::new("A", "string")]).unwrap();
        assert_eq!(
            xml,
            "<category title=\"Demo\" weaveEntityId=\"99999\" >\n\
             <attribute title=\"A\" dataType=\"string\" weaveEntityId=\"0\" object_id=\"0000\"/>\n\
             </category>\n"
        );
    }

    #[test]
    fn explicit_ids_are_kept_in_insertion_order() {
        let xml = render_custom_hierarchy(
            "Mixed",
            [
                HierarchyItem::new("Zeta", "number")
                    .with_weave_entity_id(12)
                    .with_object_id("42"),
                HierarchyItem::new("Alpha", "string").with_weave_entity_id(3),
            ],
        )
        .unwrap();
        let zeta = xml.find("Zeta").unwrap();
        let alpha = xml.find("Alpha").unwrap();
        assert!(zeta < alpha);
        assert!(xml.contains(r#"weaveEntityId="12" object_id="42"/>"#));
        assert!(xml.contains(r#"weaveEntityId="3" object_id="0000"/>"#));
    }

    #[test]
    fn empty_object_id_uses_default() {
        let mut set = WeaveXmlSet::new("T", 1);
        set.add_attribute(HierarchyItem::new("A", "string").with_object_id(""));
        assert!(set.render().unwrap().contains(r#"object_id="0000""#));
    }

    #[test]
    fn empty_category_has_no_attribute_lines() {
        let set = WeaveXmlSet::new("Empty", 5);
        assert!(set.is_empty());
        assert_eq!(
            set.render().unwrap(),
            "<category title=\"Empty\" weaveEntityId=\"5\" >\n</category>\n"
        );
    }

    #[test]
    fn attribute_values_are_escaped() {
        let xml = render_custom_hierarchy(
            "R&D \"labs\"",
            [HierarchyItem::new("<GDP>", "number")],
        )
        .unwrap();
        assert!(xml.contains(r#"title="R&amp;D &quot;labs&quot;""#));
        assert!(xml.contains(r#"title="&lt;GDP&gt;""#));
    }
}
