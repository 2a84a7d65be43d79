use pretty_assertions::assert_eq;

use super::{Query, Update};
use crate::{
    bson::{doc, Bson},
    coll::options::FullTextSearchOptions,
    error::ErrorKind,
};

#[derive(serde::Serialize, serde::Deserialize)]
struct Item;

#[test]
fn empty_renders_match_all() {
    let query = Query::<Item>::empty();
    assert_eq!(query.render().unwrap(), doc! {});
}

#[test]
fn json_renders_to_filter() {
    let query = Query::<Item>::from_json(r#"{ "qty": { "$gt": 4 } }"#);
    assert_eq!(query.render().unwrap(), doc! { "qty": { "$gt": 4i64 } });
}

#[test]
fn malformed_json_surfaces_at_render() {
    let query = Query::<Item>::from_json("{ not json");
    let err = query.render().unwrap_err();
    assert!(matches!(err.kind.as_ref(), ErrorKind::Json(_)));
}

#[test]
fn text_renders_text_operator() {
    let options = FullTextSearchOptions::builder()
        .language("pt".to_string())
        .case_sensitive(true)
        .build();
    let query = Query::<Item>::from_text("coffee", options);
    assert_eq!(
        query.render().unwrap(),
        doc! { "$text": { "$search": "coffee", "$language": "pt", "$caseSensitive": true } }
    );
}

#[test]
fn combinators_render_both_operands() {
    let a = Query::<Item>::from_filter(doc! { "x": 1 });
    let b = Query::<Item>::from_filter(doc! { "y": 2 });
    assert_eq!(
        (a.clone() & b.clone()).render().unwrap(),
        doc! { "$and": [{ "x": 1 }, { "y": 2 }] }
    );
    assert_eq!(
        (a.clone() | b).render().unwrap(),
        doc! { "$or": [{ "x": 1 }, { "y": 2 }] }
    );
    assert_eq!((!a).render().unwrap(), doc! { "$nor": [{ "x": 1 }] });
}

#[test]
fn template_renders_only_after_completion() {
    let query = Query::<Item>::from_template(|value: Bson| doc! { "owner": value });

    let err = query.clone().render().unwrap_err();
    assert!(matches!(err.kind.as_ref(), ErrorKind::QueryIncomplete { .. }));

    let bound = query.complete_expression("u1").unwrap();
    assert_eq!(bound.render().unwrap(), doc! { "owner": "u1" });
}

#[test]
fn complete_expression_rejects_other_variants() {
    let query = Query::<Item>::from_filter(doc! { "x": 1 });
    let err = query.complete_expression("x").unwrap_err();
    assert!(matches!(err.kind.as_ref(), ErrorKind::QueryIncomplete { .. }));
}

#[test]
fn equality_is_by_rendered_filter_and_update() {
    let a = Query::<Item>::from_json(r#"{ "x": 1 }"#);
    let b = Query::<Item>::from_filter(doc! { "x": 1i64 });
    assert_eq!(a, b);

    let with_update = b.clone().with_update(Update::new().set(doc! { "x": 2 }));
    assert_ne!(b, with_update);
}

#[test]
fn render_round_trip_is_stable() {
    let query = Query::<Item>::from_filter(doc! { "x": { "$in": [1, 2] }, "y": "z" });
    let rendered = query.render().unwrap();
    let reparsed = Query::<Item>::from_filter(rendered.clone());
    assert_eq!(reparsed.render().unwrap(), rendered);
}

#[test]
fn update_operators_merge_in_declaration_order() {
    let update = Update::new()
        .set(doc! { "a": 1 })
        .inc("n", 2)
        .set(doc! { "b": 2 })
        .add_to_set("tags", "x");

    let rendered = update.render();
    let keys: Vec<&str> = rendered.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["$set", "$inc", "$addToSet"]);
    assert_eq!(
        rendered.get_document("$set").unwrap(),
        &doc! { "a": 1, "b": 2 }
    );
}

#[test]
fn update_from_document_round_trips() {
    let raw = doc! { "$set": { "a": 1 }, "$unset": { "b": "" } };
    assert_eq!(Update::from_document(raw.clone()).render(), raw);
}

#[test]
fn update_travels_with_the_query() {
    let update = Update::new().set(doc! { "done": true });
    let mut query = Query::<Item>::from_filter(doc! { "x": 1 }).with_update(update.clone());
    assert_eq!(query.update(), Some(&update));
    assert_eq!(query.take_update(), Some(update));
    assert_eq!(query.update(), None);
}

#[test]
fn unset_renders_empty_string_body() {
    assert_eq!(
        Update::new().unset("legacy").render(),
        doc! { "$unset": { "legacy": "" } }
    );
}
