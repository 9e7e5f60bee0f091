//! Sends each operation to the service mounted for its resource kind.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use catalog_core::ResourceKind;
use tower::util::BoxService;
use tower::Service;

use super::operation::{Operation, OperationError, OperationResponse};

type KindService = BoxService<Operation, OperationResponse, OperationError>;

/// One service per mounted resource kind. Operations on a kind with nothing
/// mounted fail with [`OperationError::Unmounted`].
#[derive(Default)]
pub struct OperationRouter {
    services: BTreeMap<ResourceKind, KindService>,
}

impl OperationRouter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mounts `service` for `kind`, replacing any earlier mount.
    pub fn register<S>(&mut self, kind: ResourceKind, service: S)
    where
        S: Service<Operation, Response = OperationResponse, Error = OperationError> + Send + 'static,
        S::Future: Send + 'static,
    {
        self.services.insert(kind, BoxService::new(service));
    }

    /// Mounted kinds in declaration order.
    #[must_use]
    pub fn mounted(&self) -> Vec<ResourceKind> {
        self.services.keys().copied().collect()
    }
}

impl Service<Operation> for OperationRouter {
    type Response = OperationResponse;
    type Error = OperationError;
    type Future = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        for service in self.services.values_mut() {
            ready!(service.poll_ready(cx))?;
        }
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        let kind = op.kind();
        match self.services.get_mut(&kind) {
            Some(service) => service.call(op),
            None => Box::pin(std::future::ready(Err(OperationError::Unmounted { kind }))),
        }
    }
}

#[cfg(test)]
mod tests {
    use catalog_core::{DeleteResponse, Resource, ResourceFields, UserFields};
    use tower::ServiceExt;

    use super::*;
    use crate::service::operation::{service_names, OperationContext};

    /// Replies with a resource whose ID is the operation's call ID.
    struct CallIdEcho;

    impl Service<Operation> for CallIdEcho {
        type Response = OperationResponse;
        type Error = OperationError;
        type Future = std::future::Ready<Result<OperationResponse, OperationError>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, op: Operation) -> Self::Future {
            let response = match op {
                Operation::Delete { .. } => {
                    OperationResponse::Deleted(DeleteResponse { success: true })
                }
                other => OperationResponse::Resource(Resource {
                    id: other.ctx().call_id,
                    fields: ResourceFields::Users(UserFields::default()),
                }),
            };
            std::future::ready(Ok(response))
        }
    }

    fn read(kind: ResourceKind, call_id: u64) -> Operation {
        Operation::Read {
            ctx: OperationContext::new(call_id, kind.as_str(), 5000),
            kind,
            id: 1,
        }
    }

    #[tokio::test]
    async fn routes_by_operation_kind() {
        let mut router = OperationRouter::new();
        router.register(ResourceKind::Users, CallIdEcho);

        let resp = router.oneshot(read(ResourceKind::Users, 9)).await.unwrap();
        assert_eq!(resp.into_resource().map(|r| r.id), Some(9));
    }

    #[tokio::test]
    async fn unmounted_kind_is_rejected() {
        let mut router = OperationRouter::new();
        router.register(ResourceKind::Users, CallIdEcho);

        let err = router
            .oneshot(Operation::Delete {
                ctx: OperationContext::new(1, service_names::COMICS, 5000),
                kind: ResourceKind::Comics,
                id: 4,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OperationError::Unmounted {
                kind: ResourceKind::Comics
            }
        ));
    }

    #[test]
    fn mounted_kinds_are_listed_in_order() {
        let mut router = OperationRouter::new();
        router.register(ResourceKind::Users, CallIdEcho);
        router.register(ResourceKind::Books, CallIdEcho);
        assert_eq!(
            router.mounted(),
            vec![ResourceKind::Books, ResourceKind::Users]
        );
    }
}
