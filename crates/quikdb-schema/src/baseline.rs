//! The message store as first shipped (version 0).

use crate::entities::*;
use quikdb_core::{EntityDef, FieldDef, FieldType, SchemaBundle};

/// Schema of a version-0 store.
///
/// Every later version is derived from this by replaying the steps in
/// [`steps`](crate::steps::steps).
pub fn baseline() -> SchemaBundle {
    SchemaBundle::new(0)
        .with_entity(
            EntityDef::new(CONVERSATION)
                .with_field(FieldDef::primary("id", FieldType::Int))
                .with_field(FieldDef::list("recipients", FieldType::reference_list(RECIPIENT)))
                .with_field(FieldDef::new("count", FieldType::Int).with_default(0))
                .with_field(FieldDef::new("date", FieldType::Int).with_default(0))
                .with_field(FieldDef::new("snippet", FieldType::String).with_default(""))
                .with_field(FieldDef::new("read", FieldType::Bool).with_default(true))
                .with_field(FieldDef::new("me", FieldType::Bool).with_default(false))
                .with_field(FieldDef::new("archived", FieldType::Bool).with_default(false))
                .with_field(FieldDef::new("blocked", FieldType::Bool).with_default(false))
                .with_field(FieldDef::new("draft", FieldType::String).with_default("")),
        )
        .with_entity(
            EntityDef::new(MESSAGE)
                .with_field(FieldDef::primary("id", FieldType::Int))
                .with_field(FieldDef::new("threadId", FieldType::Int).with_default(0).with_index())
                .with_field(FieldDef::new("contentId", FieldType::Int).with_default(0))
                .with_field(FieldDef::new("address", FieldType::String).with_default(""))
                .with_field(FieldDef::new("boxId", FieldType::Int).with_default(0))
                .with_field(FieldDef::new("type", FieldType::String).with_default(""))
                .with_field(FieldDef::new("date", FieldType::Int).with_default(0))
                .with_field(FieldDef::new("dateSent", FieldType::Int).with_default(0))
                .with_field(FieldDef::new("seen", FieldType::Bool).with_default(false))
                .with_field(FieldDef::new("read", FieldType::Bool).with_default(false))
                .with_field(FieldDef::new("locked", FieldType::Bool).with_default(false))
                .with_field(FieldDef::new("body", FieldType::String).with_default(""))
                .with_field(FieldDef::new("errorCode", FieldType::Int).with_default(0))
                .with_field(FieldDef::new("deliveryStatus", FieldType::Int).with_default(-1))
                .with_field(
                    FieldDef::new("attachmentTypeString", FieldType::String)
                        .with_default("NOT_LOADED"),
                )
                .with_field(FieldDef::new("mmsDeliveryStatusString", FieldType::String).with_default(""))
                .with_field(FieldDef::new("readReportString", FieldType::String).with_default(""))
                .with_field(FieldDef::new("errorType", FieldType::Int).with_default(0))
                .with_field(FieldDef::new("messageSize", FieldType::Int).with_default(0))
                .with_field(FieldDef::new("messageType", FieldType::Int).with_default(0))
                .with_field(FieldDef::new("mmsStatus", FieldType::Int).with_default(0))
                .with_field(FieldDef::new("subject", FieldType::String).with_default(""))
                .with_field(FieldDef::new("textContentType", FieldType::String).with_default(""))
                .with_field(FieldDef::list("parts", FieldType::reference_list(MMS_PART))),
        )
        .with_entity(
            EntityDef::new(MMS_PART)
                .with_field(FieldDef::primary("id", FieldType::Int))
                .with_field(FieldDef::new("type", FieldType::String).with_default(""))
                .with_field(FieldDef::optional("text", FieldType::String))
                .with_field(FieldDef::optional("image", FieldType::String)),
        )
        .with_entity(
            EntityDef::new(RECIPIENT)
                .with_field(FieldDef::primary("id", FieldType::Int))
                .with_field(FieldDef::new("address", FieldType::String).with_default(""))
                .with_field(FieldDef::optional("contact", FieldType::reference(CONTACT)))
                .with_field(FieldDef::new("lastUpdate", FieldType::Int).with_default(0)),
        )
        .with_entity(
            EntityDef::new(CONTACT)
                .with_field(FieldDef::primary("lookupKey", FieldType::String))
                .with_field(FieldDef::list("numbers", FieldType::reference_list(PHONE_NUMBER)))
                .with_field(FieldDef::new("name", FieldType::String).with_default(""))
                .with_field(FieldDef::new("lastUpdate", FieldType::Int).with_default(0)),
        )
        .with_entity(
            EntityDef::new(PHONE_NUMBER)
                .with_field(FieldDef::new("address", FieldType::String).with_default(""))
                .with_field(FieldDef::new("type", FieldType::String).with_default("")),
        )
        .with_entity(
            EntityDef::new(SYNC_LOG)
                .with_field(FieldDef::primary("id", FieldType::Int))
                .with_field(FieldDef::new("date", FieldType::Int).with_default(0)),
        )
}
