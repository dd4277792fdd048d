//! Session abstraction for remote procedure calls.
//!
//! A session is the only view the market components have of the network:
//! call a named remote procedure, register a local one, and find out whether
//! the transport is still attached. Implementations may sit on WAMP,
//! WebSockets, HTTP, or anything else that routes calls by name.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;
use crate::procedures::{decode, encode};

/// Identifier of a session attached to a router.
pub type SessionId = u64;

/// Metadata handed to a procedure with each invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallDetails {
    /// The calling session.
    pub caller: SessionId,
    /// The name the procedure was invoked under.
    pub procedure: String,
}

/// Handle to a registered procedure, used to unregister it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub id: u64,
    pub procedure: String,
}

/// A locally implemented, remotely callable procedure.
#[async_trait]
pub trait Procedure: Send + Sync {
    /// Handle one invocation. `args` and the result are CBOR-encoded.
    async fn invoke(&self, details: CallDetails, args: Vec<u8>) -> Result<Vec<u8>>;
}

/// Session trait for calling and serving remote procedures.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Session: Send + Sync {
    /// Call a remote procedure by name.
    async fn call(&self, procedure: &str, args: Vec<u8>) -> Result<Vec<u8>>;

    /// Register a local procedure under a name.
    async fn register(&self, procedure: &str, handler: Arc<dyn Procedure>)
        -> Result<Registration>;

    /// Withdraw a registration.
    async fn unregister(&self, registration: &Registration) -> Result<()>;

    /// Whether the session's transport is still attached.
    fn is_attached(&self) -> bool;

    /// This session's id.
    fn session_id(&self) -> SessionId;
}

/// Extension trait for calling with typed arguments and results.
pub trait SessionExt: Session {
    /// Encode `request`, call `procedure`, decode the result.
    fn call_typed<Req, Resp>(
        &self,
        procedure: &str,
        request: &Req,
    ) -> impl Future<Output = Result<Resp>> + Send
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned + Send;
}

impl<S: Session + ?Sized> SessionExt for S {
    async fn call_typed<Req, Resp>(&self, procedure: &str, request: &Req) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned + Send,
    {
        let args = encode(request)?;
        let result = self.call(procedure, args).await?;
        decode(&result)
    }
}

/// An in-memory router for tests and single-process deployments.
///
/// Sessions attached to the same router can call each other's procedures.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    use tokio::sync::RwLock;

    use crate::error::RpcError;

    struct Entry {
        registration_id: u64,
        owner: SessionId,
        handler: Arc<dyn Procedure>,
    }

    /// Shared routing table for memory sessions.
    pub struct MemoryRouter {
        procedures: RwLock<HashMap<String, Entry>>,
        next_session: AtomicU64,
        next_registration: AtomicU64,
    }

    impl MemoryRouter {
        /// Create a new router.
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Attach a new session to this router.
        pub fn attach(self: &Arc<Self>) -> Arc<MemorySession> {
            let id = self.next_session.fetch_add(1, Ordering::Relaxed) + 1;
            Arc::new(MemorySession {
                id,
                router: Arc::clone(self),
                attached: AtomicBool::new(true),
            })
        }

        /// Names currently registered, sorted.
        pub async fn procedures(&self) -> Vec<String> {
            let mut names: Vec<String> = self.procedures.read().await.keys().cloned().collect();
            names.sort();
            names
        }

        async fn drop_owned_by(&self, owner: SessionId) {
            self.procedures
                .write()
                .await
                .retain(|_, entry| entry.owner != owner);
        }
    }

    impl Default for MemoryRouter {
        fn default() -> Self {
            Self {
                procedures: RwLock::new(HashMap::new()),
                next_session: AtomicU64::new(0),
                next_registration: AtomicU64::new(0),
            }
        }
    }

    /// In-memory session implementation.
    pub struct MemorySession {
        id: SessionId,
        router: Arc<MemoryRouter>,
        attached: AtomicBool,
    }

    impl MemorySession {
        /// Simulate losing the transport. Registrations owned by this
        /// session are dropped and further calls fail with
        /// [`RpcError::TransportLost`].
        pub async fn detach(&self) {
            self.attached.store(false, Ordering::SeqCst);
            self.router.drop_owned_by(self.id).await;
        }

        fn ensure_attached(&self) -> Result<()> {
            if self.is_attached() {
                Ok(())
            } else {
                Err(RpcError::TransportLost)
            }
        }
    }

    #[async_trait]
    impl Session for MemorySession {
        async fn call(&self, procedure: &str, args: Vec<u8>) -> Result<Vec<u8>> {
            self.ensure_attached()?;

            let handler = {
                let procedures = self.router.procedures.read().await;
                match procedures.get(procedure) {
                    Some(entry) => Arc::clone(&entry.handler),
                    None => return Err(RpcError::NoSuchProcedure(procedure.to_string())),
                }
            };

            let details = CallDetails {
                caller: self.id,
                procedure: procedure.to_string(),
            };
            handler.invoke(details, args).await
        }

        async fn register(
            &self,
            procedure: &str,
            handler: Arc<dyn Procedure>,
        ) -> Result<Registration> {
            self.ensure_attached()?;

            let mut procedures = self.router.procedures.write().await;
            if procedures.contains_key(procedure) {
                return Err(RpcError::AlreadyRegistered(procedure.to_string()));
            }

            let registration_id = self.router.next_registration.fetch_add(1, Ordering::Relaxed) + 1;
            procedures.insert(
                procedure.to_string(),
                Entry {
                    registration_id,
                    owner: self.id,
                    handler,
                },
            );

            Ok(Registration {
                id: registration_id,
                procedure: procedure.to_string(),
            })
        }

        async fn unregister(&self, registration: &Registration) -> Result<()> {
            self.ensure_attached()?;

            let mut procedures = self.router.procedures.write().await;
            match procedures.get(&registration.procedure) {
                Some(entry)
                    if entry.registration_id == registration.id && entry.owner == self.id =>
                {
                    procedures.remove(&registration.procedure);
                    Ok(())
                }
                _ => Err(RpcError::NoSuchProcedure(registration.procedure.clone())),
            }
        }

        fn is_attached(&self) -> bool {
            self.attached.load(Ordering::SeqCst)
        }

        fn session_id(&self) -> SessionId {
            self.id
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryRouter;
    use super::*;
    use crate::error::RpcError;

    struct Echo;

    #[async_trait]
    impl Procedure for Echo {
        async fn invoke(&self, details: CallDetails, args: Vec<u8>) -> Result<Vec<u8>> {
            let text: String = decode(&args)?;
            encode(&format!("{}:{}", details.caller, text))
        }
    }

    #[tokio::test]
    async fn test_memory_call_roundtrip() {
        let router = MemoryRouter::new();
        let server = router.attach();
        let client = router.attach();

        server.register("test.echo", Arc::new(Echo)).await.unwrap();

        let reply: String = client
            .call_typed("test.echo", &"ping".to_string())
            .await
            .unwrap();
        assert_eq!(reply, format!("{}:ping", client.session_id()));
    }

    #[tokio::test]
    async fn test_unknown_procedure() {
        let router = MemoryRouter::new();
        let client = router.attach();

        let err = client.call("test.missing", vec![]).await.unwrap_err();
        assert_eq!(err, RpcError::NoSuchProcedure("test.missing".into()));
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let router = MemoryRouter::new();
        let a = router.attach();
        let b = router.attach();

        a.register("test.echo", Arc::new(Echo)).await.unwrap();
        let err = b.register("test.echo", Arc::new(Echo)).await.unwrap_err();
        assert!(matches!(err, RpcError::AlreadyRegistered(_)));
    }

    #[tokio::test]
    async fn test_unregister() {
        let router = MemoryRouter::new();
        let server = router.attach();
        let client = router.attach();

        let reg = server.register("test.echo", Arc::new(Echo)).await.unwrap();
        server.unregister(&reg).await.unwrap();

        assert!(router.procedures().await.is_empty());
        assert!(matches!(
            client.call("test.echo", encode(&"x").unwrap()).await,
            Err(RpcError::NoSuchProcedure(_))
        ));
    }

    #[tokio::test]
    async fn test_detach_loses_transport_and_registrations() {
        let router = MemoryRouter::new();
        let server = router.attach();
        let client = router.attach();

        server.register("test.echo", Arc::new(Echo)).await.unwrap();
        server.detach().await;

        assert!(!server.is_attached());
        assert_eq!(
            server.call("test.echo", vec![]).await.unwrap_err(),
            RpcError::TransportLost
        );
        assert!(matches!(
            client.call("test.echo", vec![]).await,
            Err(RpcError::NoSuchProcedure(_))
        ));
    }
}
