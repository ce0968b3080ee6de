//! Entity descriptors driving the generic create/update/delete handler.
//! One row per mutable entity: which collection it lives in, how its form
//! input is validated, and the label used in generic store-error messages.

use serde_json::Value;

use crate::store::{self, Collection};
use crate::validate::{self, FieldErrors, Fields};

pub struct EntityDescriptor {
    /// Dispatch key: the method namespace, or `catalogs/<name>` for the
    /// catalog tables selected by the `catalog` param.
    pub key: &'static str,
    pub label: &'static str,
    pub collection: &'static Collection,
    pub validate: fn(&Value) -> Result<Fields, FieldErrors>,
}

pub static ENTITIES: &[EntityDescriptor] = &[
    EntityDescriptor {
        key: "institutions",
        label: "institution",
        collection: &store::INSTITUTIONS,
        validate: validate::institution,
    },
    EntityDescriptor {
        key: "careers",
        label: "career",
        collection: &store::CAREERS,
        validate: validate::career,
    },
    EntityDescriptor {
        key: "courses",
        label: "course",
        collection: &store::COURSES,
        validate: validate::course,
    },
    EntityDescriptor {
        key: "catalogs/grades",
        label: "grade",
        collection: &store::GRADES_CATALOG,
        validate: validate::grade_item,
    },
    EntityDescriptor {
        key: "catalogs/sections",
        label: "section",
        collection: &store::SECTIONS_CATALOG,
        validate: validate::section_item,
    },
    EntityDescriptor {
        key: "catalogs/periods",
        label: "period",
        collection: &store::PERIODS_CATALOG,
        validate: validate::period_item,
    },
];

pub fn find(key: &str) -> Option<&'static EntityDescriptor> {
    ENTITIES.iter().find(|d| d.key == key)
}
