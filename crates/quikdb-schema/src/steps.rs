//! Every migration step of the message store, oldest first.

use crate::contacts::ContactLookup;
use crate::entities::*;
use crate::preferences::{ConsolidateThemes, RenumberActions};
use quikdb_core::migration::{
    MigrationError, MigrationStep, RecordTransform, TransformContext, TransformOutput,
};
use quikdb_core::{EntityDef, FieldDef, FieldType, Key, Record, Value};
use std::sync::Arc;

/// The full step list, versions 0 through 14.
///
/// Version 8 repopulates phone numbers from `contacts`.
pub fn steps(contacts: Arc<dyn ContactLookup>) -> Vec<MigrationStep> {
    vec![
        MigrationStep::new(0, "drop inline part images").remove_field(MMS_PART, "image"),
        MigrationStep::new(1, "message subscription id")
            .add_field(MESSAGE, FieldDef::new("subId", FieldType::Int).with_default(0)),
        MigrationStep::new(2, "conversation name")
            .add_field(CONVERSATION, FieldDef::new("name", FieldType::String).with_default("")),
        MigrationStep::new(3, "scheduled messages").create_table(
            EntityDef::new(SCHEDULED_MESSAGE)
                .with_field(FieldDef::primary("id", FieldType::Int))
                .with_field(FieldDef::new("date", FieldType::Int).with_default(0))
                .with_field(FieldDef::new("subId", FieldType::Int).with_default(-1))
                .with_field(FieldDef::list("recipients", FieldType::StringList))
                .with_field(FieldDef::new("sendAsGroup", FieldType::Bool).with_default(true))
                .with_field(FieldDef::new("body", FieldType::String).with_default(""))
                .with_field(FieldDef::list("attachments", FieldType::StringList)),
        ),
        MigrationStep::new(4, "pinned conversations").add_field(
            CONVERSATION,
            FieldDef::new("pinned", FieldType::Bool)
                .with_default(false)
                .with_index(),
        ),
        MigrationStep::new(5, "blocked numbers").create_table(
            EntityDef::new(BLOCKED_NUMBER)
                .with_field(FieldDef::primary("id", FieldType::Int))
                .with_field(FieldDef::new("address", FieldType::String)),
        ),
        MigrationStep::new(6, "blocking clients and part sequence")
            .add_field(CONVERSATION, FieldDef::optional("blockingClient", FieldType::Int))
            .add_field(CONVERSATION, FieldDef::optional("blockReason", FieldType::String))
            .add_field(MMS_PART, FieldDef::new("seq", FieldType::Int).with_default(0))
            .add_field(MMS_PART, FieldDef::optional("name", FieldType::String)),
        MigrationStep::new(7, "conversation last message")
            .add_reference(CONVERSATION, "lastMessage", MESSAGE)
            .remove_field(CONVERSATION, "count")
            .remove_field(CONVERSATION, "date")
            .remove_field(CONVERSATION, "snippet")
            .remove_field(CONVERSATION, "read")
            .remove_field(CONVERSATION, "me")
            .transform(CONVERSATION, LastMessage),
        MigrationStep::new(8, "keyed phone numbers and recipient themes")
            .clear_table(PHONE_NUMBER)
            .create_table(
                EntityDef::new(CONTACT_GROUP)
                    .with_field(FieldDef::primary("id", FieldType::Int))
                    .with_field(FieldDef::new("title", FieldType::String))
                    .with_field(FieldDef::list("contacts", FieldType::reference_list(CONTACT))),
            )
            .add_field(PHONE_NUMBER, FieldDef::primary("id", FieldType::Int))
            .add_field(PHONE_NUMBER, FieldDef::optional("accountType", FieldType::String))
            .add_field(
                PHONE_NUMBER,
                FieldDef::new("isDefault", FieldType::Bool).with_default(false),
            )
            .add_field(CONTACT, FieldDef::new("starred", FieldType::Bool).with_default(false))
            .add_field(CONTACT, FieldDef::optional("photoUri", FieldType::String))
            .transform(CONTACT, ContactNumbers::new(contacts))
            .rewrite_preferences(ConsolidateThemes),
        MigrationStep::new(9, "renumber notification and swipe actions")
            .rewrite_preferences(RenumberActions),
        MigrationStep::new(10, "part message id")
            .add_field(
                MMS_PART,
                FieldDef::new("messageId", FieldType::Int)
                    .with_default(0)
                    .with_index(),
            )
            .transform(MMS_PART, PartMessageId),
        MigrationStep::new(11, "scheduled conversation and content filters")
            .add_field(
                SCHEDULED_MESSAGE,
                FieldDef::new("conversationId", FieldType::Int).with_default(0),
            )
            .create_table(
                EntityDef::new(MESSAGE_CONTENT_FILTER)
                    .with_field(FieldDef::primary("id", FieldType::Int))
                    .with_field(FieldDef::new("value", FieldType::String))
                    .with_field(FieldDef::new("caseSensitive", FieldType::Bool).with_default(false))
                    .with_field(FieldDef::new("isRegex", FieldType::Bool).with_default(false))
                    .with_field(
                        FieldDef::new("includeContacts", FieldType::Bool).with_default(false),
                    ),
            ),
        MigrationStep::new(12, "draft date")
            .add_field(CONVERSATION, FieldDef::new("draftDate", FieldType::Int).with_default(0)),
        MigrationStep::new(13, "emoji reactions")
            .create_table(
                EntityDef::new(EMOJI_REACTION)
                    .with_field(FieldDef::primary("id", FieldType::Int))
                    .with_field(FieldDef::new("reactionMessageId", FieldType::Int).with_index())
                    .with_field(FieldDef::new("senderAddress", FieldType::String))
                    .with_field(FieldDef::new("emoji", FieldType::String))
                    .with_field(FieldDef::new("originalMessageText", FieldType::String))
                    .with_field(FieldDef::new("threadId", FieldType::Int).with_index()),
            )
            .add_field(
                MESSAGE,
                FieldDef::new("isEmojiReaction", FieldType::Bool).with_default(false),
            )
            .add_reference_list(MESSAGE, "emojiReactions", EMOJI_REACTION)
            .create_table(
                EntityDef::new(EMOJI_SYNC_NEEDED)
                    .with_field(FieldDef::new("createdAt", FieldType::Int).with_default(0)),
            )
            .insert(EMOJI_SYNC_NEEDED, Record::keyless().with("createdAt", 0)),
        MigrationStep::new(14, "send as group")
            .add_field(
                CONVERSATION,
                FieldDef::new("sendAsGroup", FieldType::Bool).with_default(false),
            )
            .add_field(MESSAGE, FieldDef::new("sendAsGroup", FieldType::Bool).with_default(false))
            .transform(CONVERSATION, SendAsGroup),
    ]
}

/// Points each conversation at its most recent message.
///
/// Conversations without messages keep a null reference.
#[derive(Debug, Clone, Copy)]
pub struct LastMessage;

impl RecordTransform for LastMessage {
    fn apply(
        &self,
        mut conversation: Record,
        cx: &TransformContext<'_>,
    ) -> Result<TransformOutput, MigrationError> {
        let thread = conversation.get_int("id");
        let latest = cx
            .snapshot()
            .max_by_key(
                MESSAGE,
                |message| thread.is_some() && message.get_int("threadId") == thread,
                |message| message.get_int("date").unwrap_or(0),
            )
            .map(|message| message.key.clone());

        conversation.set("lastMessage", latest);
        Ok(conversation.into())
    }
}

/// Rebuilds a contact's numbers and photo from the address book.
///
/// Each number becomes a `PhoneNumber` keyed by its address book id. A
/// contact the address book doesn't know keeps no numbers and no photo.
pub struct ContactNumbers {
    contacts: Arc<dyn ContactLookup>,
}

impl ContactNumbers {
    /// Create the transform over an address book.
    pub fn new(contacts: Arc<dyn ContactLookup>) -> Self {
        Self { contacts }
    }
}

impl RecordTransform for ContactNumbers {
    fn apply(
        &self,
        mut contact: Record,
        cx: &TransformContext<'_>,
    ) -> Result<TransformOutput, MigrationError> {
        let lookup_key = match contact.get_str("lookupKey") {
            Some(key) => key.to_string(),
            None => {
                return Err(MigrationError::transform(
                    cx.entity(),
                    format!("contact {} has no lookup key", contact.key),
                ))
            }
        };

        let Some(numbers) = self.contacts.lookup(&lookup_key) else {
            cx.fallback("numbers", "contact not in address book");
            contact.set("numbers", Vec::<Key>::new());
            contact.set("photoUri", Value::Null);
            return Ok(contact.into());
        };

        let photo_uri = numbers.iter().find_map(|number| number.photo_uri.clone());
        let keys: Vec<Key> = numbers.iter().map(|number| Key::Int(number.id)).collect();
        contact.set("numbers", keys);
        contact.set("photoUri", photo_uri);

        let output = numbers
            .into_iter()
            .fold(TransformOutput::new(contact), |output, number| {
                output.emit(
                    PHONE_NUMBER,
                    Record::keyed("id", number.id)
                        .with("address", number.address)
                        .with("type", number.number_type)
                        .with("accountType", number.account_type)
                        .with("isDefault", false),
                )
            });
        Ok(output)
    }
}

/// Recomputes a part's message id from the message whose parts list holds
/// it.
///
/// Parts no message links to get 0.
#[derive(Debug, Clone, Copy)]
pub struct PartMessageId;

impl RecordTransform for PartMessageId {
    fn apply(
        &self,
        mut part: Record,
        cx: &TransformContext<'_>,
    ) -> Result<TransformOutput, MigrationError> {
        let content_id = cx
            .snapshot()
            .find(MESSAGE, |message| message.get_refs("parts").contains(&part.key))
            .and_then(|message| message.get_int("contentId"));

        let message_id = content_id.unwrap_or_else(|| {
            cx.fallback("messageId", "no message links to this part");
            0
        });
        part.set("messageId", message_id);
        Ok(part.into())
    }
}

/// Marks conversations with more than one recipient as group sends.
#[derive(Debug, Clone, Copy)]
pub struct SendAsGroup;

impl RecordTransform for SendAsGroup {
    fn apply(
        &self,
        mut conversation: Record,
        _cx: &TransformContext<'_>,
    ) -> Result<TransformOutput, MigrationError> {
        let group = conversation.get_refs("recipients").len() > 1;
        conversation.set("sendAsGroup", group);
        Ok(conversation.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quikdb_core::migration::CrossEntitySnapshot;
    use std::sync::atomic::AtomicU64;

    fn apply<T: RecordTransform>(
        transform: &T,
        snapshot: &CrossEntitySnapshot,
        entity: &str,
        record: Record,
    ) -> (TransformOutput, u64) {
        let fallbacks = AtomicU64::new(0);
        let cx = TransformContext::new(snapshot, entity, &fallbacks);
        let output = transform.apply(record, &cx).unwrap();
        (output, cx.fallback_count())
    }

    #[test]
    fn test_send_as_group() {
        let snapshot = CrossEntitySnapshot::new(14);
        let group = Record::keyed("id", 1)
            .with("recipients", vec![Key::Int(1), Key::Int(2), Key::Int(3)]);
        let single = Record::keyed("id", 2).with("recipients", vec![Key::Int(1)]);

        let (output, _) = apply(&SendAsGroup, &snapshot, CONVERSATION, group);
        assert_eq!(output.record.get_bool("sendAsGroup"), Some(true));
        let (output, _) = apply(&SendAsGroup, &snapshot, CONVERSATION, single);
        assert_eq!(output.record.get_bool("sendAsGroup"), Some(false));
    }

    #[test]
    fn test_part_message_id() {
        let snapshot = CrossEntitySnapshot::new(10)
            .with_record(
                MESSAGE,
                Record::keyed("id", 1)
                    .with("contentId", 77)
                    .with("parts", vec![Key::Int(5), Key::Int(6)]),
            );

        let (output, fallbacks) =
            apply(&PartMessageId, &snapshot, MMS_PART, Record::keyed("id", 6));
        assert_eq!(output.record.get_int("messageId"), Some(77));
        assert_eq!(fallbacks, 0);

        let (output, fallbacks) =
            apply(&PartMessageId, &snapshot, MMS_PART, Record::keyed("id", 9));
        assert_eq!(output.record.get_int("messageId"), Some(0));
        assert_eq!(fallbacks, 1);
    }

    #[test]
    fn test_last_message() {
        let snapshot = CrossEntitySnapshot::new(7)
            .with_record(MESSAGE, Record::keyed("id", 1).with("threadId", 3).with("date", 10))
            .with_record(MESSAGE, Record::keyed("id", 2).with("threadId", 3).with("date", 30))
            .with_record(MESSAGE, Record::keyed("id", 3).with("threadId", 4).with("date", 50));

        let (output, _) = apply(&LastMessage, &snapshot, CONVERSATION, Record::keyed("id", 3));
        assert_eq!(output.record.get("lastMessage"), Some(&Value::Ref(Key::Int(2))));

        let (output, _) = apply(&LastMessage, &snapshot, CONVERSATION, Record::keyed("id", 9));
        assert_eq!(output.record.get("lastMessage"), Some(&Value::Null));
    }
}
