//! Hierarchy XML rendering over populated stores

use std::sync::Arc;

use quick_xml::events::Event;
use quick_xml::Reader;

use weave_meta::{
    hierarchy, manifest, metadata, registry, xml, EntityType, HierarchyItem, IngestionService,
    InMemoryWeaveStore, ManifestId, NewDataRow, WeaveConfig, WeaveStore,
};

fn service() -> (Arc<InMemoryWeaveStore>, IngestionService) {
    let store = Arc::new(InMemoryWeaveStore::new());
    let service = IngestionService::new(store.clone(), WeaveConfig::default());
    (store, service)
}

fn indicator(parent_id: ManifestId, title: &str, object_id: &str) -> NewDataRow {
    NewDataRow {
        parent_id,
        title: title.into(),
        name: title.to_lowercase(),
        data_type: "numeric".into(),
        sql_query: format!("SELECT * FROM indicator_indicatordata WHERE indicator_id = {object_id}"),
        object_id: object_id.into(),
        year: "2012".into(),
        key_type: "country".into(),
        ..Default::default()
    }
}

/// Collect `(element, [(attribute, value)])` for every start or empty tag,
/// failing on malformed XML.
fn parse(xml: &str) -> Vec<(String, Vec<(String, String)>)> {
    let wrapped = format!("<root>{xml}</root>");
    let mut reader = Reader::from_str(&wrapped);
    let mut elements = Vec::new();
    loop {
        match reader.read_event().expect("well-formed xml") {
            Event::Start(e) | Event::Empty(e) => {
                let name = String::from_utf8(e.name().as_ref().to_vec()).unwrap();
                if name == "root" {
                    continue;
                }
                let attrs = e
                    .attributes()
                    .map(|a| {
                        let a = a.expect("valid attribute");
                        (
                            String::from_utf8(a.key.as_ref().to_vec()).unwrap(),
                            a.unescape_value().unwrap().into_owned(),
                        )
                    })
                    .collect();
                elements.push((name, attrs));
            }
            Event::Eof => break,
            _ => {}
        }
    }
    elements
}

#[tokio::test]
async fn single_table_renders_exactly() {
    let (store, service) = service();
    let parent = service.get_or_create_table("Countries").await.unwrap();
    let child = service
        .insert_data_row(indicator(parent, "GDP", "42"))
        .await
        .unwrap();

    let rendered = xml::render_full_hierarchy(&*store).await.unwrap();
    assert_eq!(
        rendered,
        format!(
            "<category title=\"Countries\" weaveEntityId=\"{parent}\" >\n\
             <attribute title=\"GDP\" dataType=\"number\" weaveEntityId=\"{child}\" object_id=\"42\"/>\n\
             </category>\n",
            parent = parent,
            child = child.entity_id
        )
    );
}

#[tokio::test]
async fn categories_follow_parent_id_and_attributes_follow_sort_order() {
    let (store, service) = service();
    let countries = service.get_or_create_table("Countries").await.unwrap();
    let cities = service.get_or_create_table("Cities").await.unwrap();

    // interleave inserts across parents
    service
        .insert_data_row(indicator(cities, "Density", "7"))
        .await
        .unwrap();
    service
        .insert_data_row(indicator(countries, "GDP", "42"))
        .await
        .unwrap();
    service
        .insert_data_row(indicator(countries, "Area", "43"))
        .await
        .unwrap();

    let elements = parse(&xml::render_full_hierarchy(&*store).await.unwrap());
    let titles: Vec<(&str, &str)> = elements
        .iter()
        .map(|(name, attrs)| {
            let title = attrs
                .iter()
                .find(|(k, _)| k == "title")
                .map(|(_, v)| v.as_str())
                .unwrap();
            (name.as_str(), title)
        })
        .collect();
    assert_eq!(
        titles,
        vec![
            ("category", "Countries"),
            ("attribute", "GDP"),
            ("attribute", "Area"),
            ("category", "Cities"),
            ("attribute", "Density"),
        ]
    );
}

#[tokio::test]
async fn table_without_children_is_not_rendered() {
    let (store, service) = service();
    service.get_or_create_table("Empty").await.unwrap();
    assert_eq!(xml::render_full_hierarchy(&*store).await.unwrap(), "");
}

#[tokio::test]
async fn empty_store_renders_nothing() {
    let store = InMemoryWeaveStore::new();
    assert_eq!(xml::render_full_hierarchy(&store).await.unwrap(), "");
}

#[tokio::test]
async fn child_without_data_type_is_not_found() {
    let store = InMemoryWeaveStore::new();
    let service = IngestionService::new(Arc::new(store.clone()), WeaveConfig::default());
    let parent = service.get_or_create_table("Countries").await.unwrap();

    // a leaf linked by hand with a title but no dataType
    let mut tx = store.begin().await.unwrap();
    let index = registry::allocate(tx.as_mut()).await.unwrap();
    let child = manifest::register(tx.as_mut(), index, EntityType::Leaf)
        .await
        .unwrap();
    hierarchy::link(tx.as_mut(), index, parent, child).await.unwrap();
    metadata::set_public(tx.as_mut(), index, child, "title", "Orphan")
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let err = xml::render_full_hierarchy(&store).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(err.to_string().contains("dataType"));
}

#[tokio::test]
async fn rendered_titles_survive_escaping() {
    let (store, service) = service();
    let parent = service.get_or_create_table("R&D <labs>").await.unwrap();
    service
        .insert_data_row(indicator(parent, "Spend \"total\"", "9"))
        .await
        .unwrap();

    let elements = parse(&xml::render_full_hierarchy(&*store).await.unwrap());
    assert_eq!(elements[0].1[0], ("title".into(), "R&D <labs>".into()));
    assert_eq!(elements[1].1[0], ("title".into(), "Spend \"total\"".into()));
}

#[test]
fn custom_hierarchy_is_well_formed() {
    let rendered = xml::render_custom_hierarchy(
        "Custom",
        vec![
            HierarchyItem::new("A", "string"),
            HierarchyItem::new("B", "number")
                .with_weave_entity_id(5)
                .with_object_id("17"),
        ],
    )
    .unwrap();

    let elements = parse(&rendered);
    assert_eq!(elements.len(), 3);
    assert_eq!(
        elements[0].1,
        vec![
            ("title".to_string(), "Custom".to_string()),
            ("weaveEntityId".to_string(), "99999".to_string()),
        ]
    );
    assert_eq!(
        elements[1].1,
        vec![
            ("title".to_string(), "A".to_string()),
            ("dataType".to_string(), "string".to_string()),
            ("weaveEntityId".to_string(), "0".to_string()),
            ("object_id".to_string(), "0000".to_string()),
        ]
    );
    assert_eq!(elements[2].1[3], ("object_id".to_string(), "17".to_string()));
}

#[tokio::test]
async fn hierarchy_items_match_rendered_attributes() {
    let (store, service) = service();
    let parent = service.get_or_create_table("Countries").await.unwrap();
    let gdp = service
        .insert_data_row(indicator(parent, "GDP", "42"))
        .await
        .unwrap();

    let items = metadata::hierarchy_items(&*store, parent).await.unwrap();
    assert_eq!(
        items,
        vec![HierarchyItem::new("GDP", "number")
            .with_weave_entity_id(gdp.entity_id.0)
            .with_object_id("42")]
    );
}
