use std::time::Duration;

use pretty_assertions::assert_eq;

use super::{facet_pipeline, hint_to_bson, merge_updated_at, rendered_for_insert};
use crate::{
    bson::{doc, Bson, DateTime},
    coll::options::*,
    document::{DbDocument, TenantAudit},
};

#[derive(serde::Serialize, serde::Deserialize)]
struct Order {
    #[serde(rename = "_id")]
    id: String,
    total: i64,
    #[serde(flatten)]
    audit: TenantAudit,
}

impl DbDocument for Order {
    type Id = String;

    const COLLECTION: &'static str = "orders";
    const HAS_TENANT_AUDIT: bool = true;

    fn id(&self) -> String {
        self.id.clone()
    }

    fn audit(&self) -> Option<&TenantAudit> {
        Some(&self.audit)
    }

    fn audit_mut(&mut self) -> Option<&mut TenantAudit> {
        Some(&mut self.audit)
    }
}

#[test]
fn paging_options_derive_skip_and_limit() {
    let options = FindOptionsPaging::builder()
        .current_page(5u64)
        .page_size(10i64)
        .build();
    assert_eq!(options.skip(), 50);
    assert_eq!(options.limit(), 10);

    let driver: mongodb::options::FindOptions = options.into();
    assert_eq!(driver.skip, Some(50));
    assert_eq!(driver.limit, Some(10));
}

#[test]
fn paging_count_options_clear_skip_and_limit() {
    let options = FindOptionsPaging::builder()
        .current_page(3u64)
        .page_size(20i64)
        .max_time(Duration::from_secs(5))
        .comment(Bson::String("paging".to_string()))
        .build();

    let count = options.to_count_options();
    assert_eq!(count.skip, None);
    assert_eq!(count.limit, None);
    assert_eq!(count.max_time, Some(Duration::from_secs(5)));
    assert_eq!(count.comment, Some(Bson::String("paging".to_string())));
}

#[test]
fn find_options_convert_totally() {
    let options = FindOptions::builder()
        .limit(7i64)
        .skip(3u64)
        .sort(doc! { "ref": 1 })
        .projection(doc! { "ref": 1, "_id": 0 })
        .batch_size(100u32)
        .allow_disk_use(true)
        .build();

    let driver: mongodb::options::FindOptions = options.clone().into();
    assert_eq!(driver.limit, Some(7));
    assert_eq!(driver.skip, Some(3));
    assert_eq!(driver.sort, Some(doc! { "ref": 1 }));
    assert_eq!(driver.projection, Some(doc! { "ref": 1, "_id": 0 }));
    assert_eq!(driver.batch_size, Some(100));
    assert_eq!(driver.allow_disk_use, Some(true));

    let one: mongodb::options::FindOneOptions = options.into();
    assert_eq!(one.skip, Some(3));
    assert_eq!(one.sort, Some(doc! { "ref": 1 }));
}

#[test]
fn return_document_after_maps_to_the_driver_enum() {
    let after = FindOneAndUpdateOptions::builder()
        .return_document_after(true)
        .build();
    let driver: mongodb::options::FindOneAndUpdateOptions = after.into();
    assert!(matches!(
        driver.return_document,
        Some(mongodb::options::ReturnDocument::After)
    ));

    let before = FindOneAndUpdateOptions::builder()
        .return_document_after(false)
        .build();
    let driver: mongodb::options::FindOneAndUpdateOptions = before.into();
    assert!(matches!(
        driver.return_document,
        Some(mongodb::options::ReturnDocument::Before)
    ));
}

#[test]
fn insert_many_translation_defaults_to_ordered() {
    let bulk: BulkWriteOptions = InsertManyOptions::builder().build().into();
    assert_eq!(bulk.is_ordered, Some(true));

    let bulk: BulkWriteOptions = InsertManyOptions::builder().ordered(false).build().into();
    assert_eq!(bulk.is_ordered, Some(false));
}

#[test]
fn plain_bulk_defaults_to_unordered() {
    let driver = BulkWriteOptions::default().into_driver(false);
    assert_eq!(driver.ordered, Some(false));

    let driver = BulkWriteOptions::builder()
        .is_ordered(true)
        .build()
        .into_driver(false);
    assert_eq!(driver.ordered, Some(true));
}

#[test]
fn transaction_force_is_the_negation() {
    assert_eq!(transaction_force(None), None);
    assert_eq!(transaction_force(Some(true)), Some(false));
    assert_eq!(transaction_force(Some(false)), Some(true));
}

#[test]
fn aggregate_paging_derives_and_overrides() {
    let derived = AggregateOptionsPaging::builder()
        .current_page(2u64)
        .page_size(5i64)
        .build();
    assert_eq!(derived.skip(), 10);
    assert_eq!(derived.limit(), 5);

    let explicit = AggregateOptionsPaging::builder()
        .current_page(2u64)
        .page_size(5i64)
        .skip(40i64)
        .limit(4i64)
        .build();
    assert_eq!(explicit.skip(), 40);
    assert_eq!(explicit.limit(), 4);
}

#[test]
fn facet_pipeline_matches_the_protocol() {
    let pipeline = vec![
        doc! { "$match": { "tenant": "t1" } },
        doc! { "$sort": { "ref": 1 } },
    ];
    let facet = facet_pipeline(&pipeline, 10, 5);

    assert_eq!(
        facet,
        vec![doc! {
            "$facet": {
                "result": [
                    { "$match": { "tenant": "t1" } },
                    { "$sort": { "ref": 1 } },
                    { "$skip": 10i64 },
                    { "$limit": 5i64 },
                ],
                "total": [
                    { "$match": { "tenant": "t1" } },
                    { "$sort": { "ref": 1 } },
                    { "$count": "total" },
                ],
            }
        }]
    );
}

#[test]
fn updated_at_merges_into_an_existing_set() {
    let now = DateTime::now();
    let mut update = doc! { "$set": { "total": 9 }, "$inc": { "n": 1 } };
    merge_updated_at(&mut update, now);

    assert_eq!(
        update.get_document("$set").unwrap(),
        &doc! { "total": 9, "updated_at": now }
    );
    assert_eq!(update.get_document("$inc").unwrap(), &doc! { "n": 1 });
}

#[test]
fn updated_at_creates_a_set_when_missing() {
    let now = DateTime::now();
    let mut update = doc! { "$inc": { "n": 1 } };
    merge_updated_at(&mut update, now);
    assert_eq!(
        update.get_document("$set").unwrap(),
        &doc! { "updated_at": now }
    );
}

#[test]
fn null_id_is_dropped_for_insert() {
    #[derive(serde::Serialize, serde::Deserialize)]
    struct Loose {
        #[serde(rename = "_id")]
        id: Option<String>,
        name: String,
    }

    impl DbDocument for Loose {
        type Id = Option<String>;

        const COLLECTION: &'static str = "loose";

        fn id(&self) -> Option<String> {
            self.id.clone()
        }
    }

    let (rendered, id_omitted) = rendered_for_insert(&Loose {
        id: None,
        name: "n".to_string(),
    })
    .unwrap();
    assert!(id_omitted);
    assert!(!rendered.contains_key("_id"));

    let (rendered, id_omitted) = rendered_for_insert(&Loose {
        id: Some("a".to_string()),
        name: "n".to_string(),
    })
    .unwrap();
    assert!(!id_omitted);
    assert_eq!(rendered.get("_id"), Some(&Bson::String("a".to_string())));
}

#[test]
fn default_bare_id_is_dropped_for_insert() {
    // String ids default to "", which must be treated like a missing id
    // rather than stored literally.
    let (rendered, id_omitted) = rendered_for_insert(&Order {
        id: String::new(),
        total: 1,
        audit: TenantAudit::default(),
    })
    .unwrap();
    assert!(id_omitted);
    assert!(!rendered.contains_key("_id"));

    let (rendered, id_omitted) = rendered_for_insert(&Order {
        id: "o1".to_string(),
        total: 1,
        audit: TenantAudit::default(),
    })
    .unwrap();
    assert!(!id_omitted);
    assert_eq!(rendered.get("_id"), Some(&Bson::String("o1".to_string())));
}

#[test]
fn only_w_zero_is_unacknowledged() {
    use mongodb::options::Acknowledgment;

    assert!(super::acknowledged(None));

    let majority = WriteConcern::builder().w(Acknowledgment::Majority).build();
    assert!(super::acknowledged(Some(&majority)));

    let one = WriteConcern::builder().w(Acknowledgment::Nodes(1)).build();
    assert!(super::acknowledged(Some(&one)));

    let fire_and_forget = WriteConcern::builder().w(Acknowledgment::Nodes(0)).build();
    assert!(!super::acknowledged(Some(&fire_and_forget)));
}

#[test]
fn write_concern_rides_the_option_conversions() {
    let concern = WriteConcern::builder()
        .w(mongodb::options::Acknowledgment::Majority)
        .build();

    let driver: mongodb::options::InsertOneOptions = InsertOneOptions::builder()
        .write_concern(concern.clone())
        .build()
        .into();
    assert_eq!(driver.write_concern, Some(concern.clone()));

    let bulk: BulkWriteOptions = InsertManyOptions::builder()
        .write_concern(concern.clone())
        .build()
        .into();
    assert_eq!(bulk.write_concern, Some(concern.clone()));
    let driver = bulk.into_driver(true);
    assert_eq!(driver.write_concern, Some(concern));
}

#[test]
fn insert_stamp_sets_created_at_and_keeps_disabled_false() {
    let mut order = Order {
        id: "o1".to_string(),
        total: 10,
        audit: TenantAudit {
            r#ref: "r1".to_string(),
            tenant: "t1".to_string(),
            ..Default::default()
        },
    };

    order.audit_mut().unwrap().stamp_insert();
    let audit = order.audit().unwrap();
    assert!(audit.created_at.is_some());
    assert!(audit.updated_at.is_none());
    assert!(!audit.disabled);
}

#[test]
fn update_options_convert_totally() {
    let options = UpdateOptions::builder()
        .upsert(true)
        .array_filters(vec![doc! { "elem.done": false }])
        .let_vars(doc! { "tenant": "t1" })
        .build();
    let driver: mongodb::options::UpdateOptions = options.into();
    assert_eq!(driver.upsert, Some(true));
    assert_eq!(driver.array_filters, Some(vec![doc! { "elem.done": false }]));
    assert_eq!(driver.let_vars, Some(doc! { "tenant": "t1" }));
}

#[test]
fn delete_options_split_between_model_and_bulk() {
    let options = DeleteOptions::builder()
        .hint(Hint::Name("IDX_REF".to_string()))
        .comment(Bson::String("purge".to_string()))
        .not_perform_in_transaction(true)
        .build();

    let (collation, hint, bulk) = super::split_delete_options(Some(options));
    assert_eq!(collation, None);
    assert_eq!(hint, Some(Bson::String("IDX_REF".to_string())));
    assert_eq!(bulk.comment, Some(Bson::String("purge".to_string())));
    assert_eq!(bulk.not_perform_in_transaction, Some(true));
}

#[test]
fn count_options_convert_totally() {
    let options = CountOptions::builder()
        .skip(2u64)
        .limit(1u64)
        .max_time(Duration::from_millis(250))
        .build();
    let driver: mongodb::options::CountOptions = options.into();
    assert_eq!(driver.skip, Some(2));
    assert_eq!(driver.limit, Some(1));
    assert_eq!(driver.max_time, Some(Duration::from_millis(250)));
}

#[test]
fn hints_lower_to_bson() {
    assert_eq!(
        hint_to_bson(Hint::Keys(doc! { "ref": 1 })),
        Bson::Document(doc! { "ref": 1 })
    );
    assert_eq!(
        hint_to_bson(Hint::Name("IDX_REF".to_string())),
        Bson::String("IDX_REF".to_string())
    );
}
