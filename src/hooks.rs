//! The command hook pipeline (spec §4.5's "Hook pipeline").
//!
//! Each command name may have an associated `before` and `after` hook. The
//! pipeline here is the generic interpreter the design notes call for
//! ("Dynamic dispatch over command names"): callers supply a validator and
//! an executor closure per command; this module owns the five-step sequence
//! and the short-circuit/rewrite semantics around it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::GlobalSocketId;
use crate::domain::Username;
use crate::error::Error;

pub type HookArgs = Vec<Value>;

/// What a command produces for its ack: `(error, data)`.
#[derive(Debug, Clone, Default)]
pub struct CommandOutcome {
    pub error: Option<Error>,
    pub data: Option<Value>,
}

impl CommandOutcome {
    pub fn ok(data: Value) -> Self {
        Self {
            error: None,
            data: Some(data),
        }
    }

    pub fn err(error: Error) -> Self {
        Self {
            error: Some(error),
            data: None,
        }
    }
}

/// What a `before` hook may decide.
pub enum BeforeOutcome {
    /// Proceed with the original args.
    Continue,
    /// Proceed, but with these args in place of the original (`replacementArgs`).
    Replace(HookArgs),
    /// Skip execution entirely and ack with this outcome.
    ShortCircuit(CommandOutcome),
}

#[async_trait]
pub trait BeforeHook: Send + Sync {
    async fn call(&self, user: &Username, args: &HookArgs, socket: &GlobalSocketId) -> BeforeOutcome;
}

#[async_trait]
pub trait AfterHook: Send + Sync {
    /// May rewrite `outcome` in place.
    async fn call(&self, user: &Username, outcome: &mut CommandOutcome, args_used: &HookArgs, socket: &GlobalSocketId);
}

/// Hooks keyed by command name (spec: "a table keyed by name").
#[derive(Default, Clone)]
pub struct HookRegistry {
    before: HashMap<String, Arc<dyn BeforeHook>>,
    after: HashMap<String, Arc<dyn AfterHook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_before(&mut self, command: impl Into<String>, hook: Arc<dyn BeforeHook>) {
        self.before.insert(command.into(), hook);
    }

    pub fn set_after(&mut self, command: impl Into<String>, hook: Arc<dyn AfterHook>) {
        self.after.insert(command.into(), hook);
    }

    fn before(&self, command: &str) -> Option<&Arc<dyn BeforeHook>> {
        self.before.get(command)
    }

    fn after(&self, command: &str) -> Option<&Arc<dyn AfterHook>> {
        self.after.get(command)
    }

    /// Runs the five-step pipeline for one command invocation.
    ///
    /// 1. `validate` rejects malformed args before any hook runs.
    /// 2. `cmdBefore`, if registered, may short-circuit or replace args.
    /// 3. `execute` runs with the (possibly replaced) args.
    /// 4. `cmdAfter`, if registered, may rewrite the outcome.
    /// 5. The caller acks the originating socket with the final outcome.
    pub async fn run<V, F, Fut>(
        &self,
        command: &str,
        user: &Username,
        socket: &GlobalSocketId,
        args: HookArgs,
        validate: V,
        execute: F,
    ) -> CommandOutcome
    where
        V: FnOnce(&HookArgs) -> Result<(), Error>,
        F: FnOnce(HookArgs) -> Fut,
        Fut: Future<Output = Result<Value, Error>>,
    {
        if let Err(e) = validate(&args) {
            return CommandOutcome::err(e);
        }

        let mut args_used = args.clone();
        if let Some(hook) = self.before(command) {
            match hook.call(user, &args, socket).await {
                BeforeOutcome::Continue => {}
                BeforeOutcome::Replace(replacement) => args_used = replacement,
                BeforeOutcome::ShortCircuit(outcome) => return outcome,
            }
        }

        let mut outcome = match execute(args_used.clone()).await {
            Ok(data) => CommandOutcome::ok(data),
            Err(e) => CommandOutcome::err(e),
        };

        if let Some(hook) = self.after(command) {
            hook.call(user, &mut outcome, &args_used, socket).await;
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{InstanceId, SocketId};
    use serde_json::json;

    fn socket() -> GlobalSocketId {
        GlobalSocketId::new(InstanceId::generate(), SocketId::generate())
    }

    struct RejectingBefore;

    #[async_trait]
    impl BeforeHook for RejectingBefore {
        async fn call(&self, _user: &Username, _args: &HookArgs, _socket: &GlobalSocketId) -> BeforeOutcome {
            BeforeOutcome::ShortCircuit(CommandOutcome::err(crate::error::not_allowed(["blocked"])))
        }
    }

    struct TaggingAfter;

    #[async_trait]
    impl AfterHook for TaggingAfter {
        async fn call(&self, _user: &Username, outcome: &mut CommandOutcome, _args_used: &HookArgs, _socket: &GlobalSocketId) {
            if let Some(data) = outcome.data.as_mut() {
                if let Value::Object(map) = data {
                    map.insert("tagged".into(), json!(true));
                }
            }
        }
    }

    #[tokio::test]
    async fn validation_short_circuits_before_any_hook() {
        let mut registry = HookRegistry::new();
        registry.set_before("roomJoin", Arc::new(RejectingBefore));
        let user = Username::new("alice").unwrap();
        let socket = socket();

        let outcome = registry
            .run(
                "roomJoin",
                &user,
                &socket,
                vec![],
                |args| {
                    if args.is_empty() {
                        Err(crate::error::wrong_arguments_count(["roomJoin"]))
                    } else {
                        Ok(())
                    }
                },
                |_| async { Ok(json!(null)) },
            )
            .await;

        assert_eq!(outcome.error.unwrap().kind(), crate::error::ErrorKind::WrongArgumentsCount);
    }

    #[tokio::test]
    async fn before_hook_can_short_circuit() {
        let mut registry = HookRegistry::new();
        registry.set_before("roomJoin", Arc::new(RejectingBefore));
        let user = Username::new("alice").unwrap();
        let socket = socket();

        let outcome = registry
            .run(
                "roomJoin",
                &user,
                &socket,
                vec![json!("room1")],
                |_| Ok(()),
                |_| async { panic!("execute must not run when before short-circuits") },
            )
            .await;

        assert_eq!(outcome.error.unwrap().kind(), crate::error::ErrorKind::NotAllowed);
    }

    #[tokio::test]
    async fn before_short_circuit_skips_the_after_hook() {
        let mut registry = HookRegistry::new();
        registry.set_before("roomJoin", Arc::new(RejectingBefore));
        registry.set_after("roomJoin", Arc::new(TaggingAfter));
        let user = Username::new("alice").unwrap();
        let socket = socket();

        let outcome = registry
            .run(
                "roomJoin",
                &user,
                &socket,
                vec![json!("room1")],
                |_| Ok(()),
                |_| async { panic!("execute must not run when before short-circuits") },
            )
            .await;

        assert_eq!(outcome.error.unwrap().kind(), crate::error::ErrorKind::NotAllowed);
        assert!(outcome.data.is_none());
    }

    #[tokio::test]
    async fn after_hook_can_rewrite_outcome() {
        let mut registry = HookRegistry::new();
        registry.set_after("roomJoin", Arc::new(TaggingAfter));
        let user = Username::new("alice").unwrap();
        let socket = socket();

        let outcome = registry
            .run(
                "roomJoin",
                &user,
                &socket,
                vec![json!("room1")],
                |_| Ok(()),
                |_| async { Ok(json!({})) },
            )
            .await;

        assert_eq!(outcome.data.unwrap()["tagged"], json!(true));
    }
}
</content>
