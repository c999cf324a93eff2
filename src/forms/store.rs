//! FormStore — owns every live form and applies form events from the bus.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info};

use super::model::Form;
use super::outbox::{OutboxHandle, PendingRecord};
use crate::conversation::ConversationId;
use crate::error::{ConversationError, Error};
use crate::events::{Event, Subscriber};

pub struct FormStore {
    forms: Mutex<HashMap<ConversationId, Form>>,
    outbox: OutboxHandle,
}

impl FormStore {
    pub fn new(outbox: OutboxHandle) -> Arc<Self> {
        Arc::new(Self {
            forms: Mutex::new(HashMap::new()),
            outbox,
        })
    }

    fn forms(&self) -> MutexGuard<'_, HashMap<ConversationId, Form>> {
        self.forms.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot of a conversation's form.
    pub fn get(&self, conversation: ConversationId) -> Option<Form> {
        self.forms().get(&conversation).cloned()
    }

    pub fn len(&self) -> usize {
        self.forms().len()
    }

    pub fn is_empty(&self) -> bool {
        self.forms().is_empty()
    }

    /// Drop a conversation's form. Returns false if there was none.
    pub fn evict(&self, conversation: ConversationId) -> bool {
        self.forms().remove(&conversation).is_some()
    }

    fn with_form<T>(
        &self,
        conversation: ConversationId,
        f: impl FnOnce(&mut Form) -> T,
    ) -> Result<T, ConversationError> {
        let mut forms = self.forms();
        let form = forms
            .get_mut(&conversation)
            .ok_or(ConversationError::UnknownConversation(conversation))?;
        Ok(f(form))
    }
}

impl Subscriber for FormStore {
    fn name(&self) -> &str {
        "form_store"
    }

    fn update(&self, event: &Event) -> Result<(), Error> {
        match event {
            Event::NewForm { conversation } => {
                let replaced = self
                    .forms()
                    .insert(*conversation, Form::new(*conversation))
                    .is_some();
                debug!(conversation = %conversation, replaced, "New form");
            }
            Event::UpdateField {
                conversation,
                field,
                value,
            } => {
                self.with_form(*conversation, |form| form.set(field.clone(), value.clone()))?;
                debug!(conversation = %conversation, field = %field, "Form field updated");
            }
            Event::UpdateMark {
                conversation,
                delta,
            } => {
                let mark = self.with_form(*conversation, |form| {
                    form.apply_mark(*delta);
                    form.mark
                })?;
                info!(conversation = %conversation, delta, mark, "Form mark updated");
            }
            Event::SaveForm { conversation } => {
                let document = self.with_form(*conversation, |form| form.to_document())?;
                self.outbox.enqueue(PendingRecord::new(*conversation, document))?;
                info!(conversation = %conversation, "Form queued for persistence");
            }
            Event::Reinitialize { conversation, .. } => {
                self.forms().insert(*conversation, Form::new(*conversation));
                debug!(conversation = %conversation, "Form reset");
            }
            Event::Notify { .. } => {}
        }
        Ok(())
    }
}
