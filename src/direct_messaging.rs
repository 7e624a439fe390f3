//! DirectMessaging: per-user access control for one-to-one messages
//! (spec §4.4).
//!
//! Mirrors [`crate::room::Room`]'s shape but against a user's own
//! blacklist/whitelist rather than a room's, and with the blacklist-privacy
//! rule (I7): a blacklisted sender is told `noUserOnline`, never
//! `notAllowed`, so they can't distinguish "blocked" from "offline".

use std::sync::Arc;

use crate::domain::{Message, MessageInput, Username};
use crate::error::{self, Error, Result};
use crate::state::{DirectList, StateStore, StoreError, UserRecord};

pub struct DirectMessaging<S: StateStore> {
    store: Arc<S>,
}

fn map_store_err(e: StoreError) -> Error {
    match e {
        StoreError::UserNotFound => error::no_user_online(Vec::<String>::new()),
        other => {
            tracing::error!(error = %other, "state store failure");
            error::server_error()
        }
    }
}

impl<S: StateStore> DirectMessaging<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    async fn fetch(&self, user: &Username) -> Result<UserRecord> {
        self.store.get_online_user(user).await.map_err(map_store_err)
    }

    /// I7: `sender` may reach `recipient` unless blacklisted, or
    /// whitelist-only and not whitelisted. A blacklisted sender is told
    /// `noUserOnline`, never `notAllowed` (blacklist-privacy rule).
    pub async fn check_access(&self, recipient: &Username, sender: &Username) -> Result<()> {
        let record = self.fetch(recipient).await?;
        if record.direct_blacklist.contains(sender) {
            return Err(error::no_user_online([sender.as_str()]));
        }
        if record.direct_whitelist_only && !record.direct_whitelist.contains(sender) {
            return Err(error::not_allowed([sender.as_str()]));
        }
        Ok(())
    }

    pub async fn message(&self, recipient: &Username, sender: &Username, input: MessageInput, timestamp_ms: i64) -> Result<Message> {
        self.check_access(recipient, sender).await?;
        Ok(Message::new(sender, input.text_message, timestamp_ms))
    }

    pub async fn get_list(&self, user: &Username, which: DirectList) -> Result<Vec<Username>> {
        let record = self.fetch(user).await?;
        Ok(record.direct_list(which).iter().cloned().collect())
    }

    pub async fn get_whitelist_mode(&self, user: &Username) -> Result<bool> {
        Ok(self.fetch(user).await?.direct_whitelist_only)
    }

    pub async fn set_whitelist_mode(&self, user: &Username, value: bool) -> Result<()> {
        self.fetch(user).await?;
        self.store
            .direct_whitelist_only_set(user, value)
            .await
            .map_err(map_store_err)
    }

    /// `addToList`/`removeFromList`: a user may only ever target themself's
    /// own lists, so there's no cross-user authorization step here, only
    /// the membership/idempotence checks (spec §4.4).
    pub async fn add_to_list(&self, user: &Username, which: DirectList, values: &[Username]) -> Result<()> {
        let record = self.fetch(user).await?;
        for v in values {
            if v == user {
                return Err(error::not_allowed([v.as_str()]));
            }
            if record.direct_list(which).contains(v) {
                return Err(error::name_in_list([v.as_str()]));
            }
        }
        for v in values {
            self.store
                .direct_add_to_list(user, which, v)
                .await
                .map_err(map_store_err)?;
        }
        Ok(())
    }

    pub async fn remove_from_list(&self, user: &Username, which: DirectList, values: &[Username]) -> Result<()> {
        let record = self.fetch(user).await?;
        for v in values {
            if !record.direct_list(which).contains(v) {
                return Err(error::no_name_in_list([v.as_str()]));
            }
        }
        for v in values {
            self.store
                .direct_remove_from_list(user, which, v)
                .await
                .map_err(map_store_err)?;
        }
        Ok(())
    }
}

</content>
