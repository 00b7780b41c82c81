//! Batched execution of one operation.
//!
//! Every item of a batch runs the full pipeline in its own context, in
//! input order. The first fault stops the batch; items that already
//! completed keep their side effects and their responses are handed back
//! with the fault.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{Instrument, debug, debug_span};

use sluice_core::{ArgumentError, BoxedDto, OperationInfo, RequestContext, ServiceError};

use crate::host::{Outcome, ServiceHost};

/// Response header reporting how many batch items completed before a fault.
pub const AUTO_BATCH_COMPLETED_HEADER: &str = "X-AutoBatch-Completed";

/// A batch stopped by the fault of one of its items.
#[derive(Error)]
#[error("batch item {completed} failed: {error}")]
pub struct BatchFailure {
    /// The number of items that completed; also the index of the failed item.
    pub completed: usize,
    /// The responses of the completed items, in input order.
    pub responses: Vec<BoxedDto>,
    /// The fault of the failed item.
    pub error: ServiceError,
}

impl fmt::Debug for BatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchFailure")
            .field("completed", &self.completed)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl From<BatchFailure> for ServiceError {
    fn from(failure: BatchFailure) -> Self {
        failure.error
    }
}

/// The result of a batch.
///
/// `Ok(None)` means the batch was cancelled, or one of its items ended
/// without a response.
pub type BatchResult = Result<Option<Vec<BoxedDto>>, BatchFailure>;

/// Runs batches through a [`ServiceHost`].
#[derive(Debug, Clone)]
pub struct BatchDispatcher {
    host: Arc<ServiceHost>,
}

impl BatchDispatcher {
    pub fn new(host: Arc<ServiceHost>) -> Self {
        Self { host }
    }

    /// Executes `requests` in order, each in a batch-item context derived
    /// from `parent`.
    pub async fn execute(
        &self,
        parent: &Arc<RequestContext>,
        info: &OperationInfo,
        requests: Vec<BoxedDto>,
    ) -> BatchResult {
        let span = debug_span!("batch", operation = info.name(), items = requests.len());
        async move {
            if let Some(limit) = self.host.options().max_batch_size
                && requests.len() > limit
            {
                let error = ArgumentError::new(format!(
                    "batch of {} '{}' items exceeds the limit of {limit}",
                    requests.len(),
                    info.name()
                ));
                return Err(self.fail(parent, 0, Vec::new(), error.into()));
            }

            let mut responses = Vec::with_capacity(requests.len());

            for (index, request) in requests.into_iter().enumerate() {
                if parent.is_cancelled() {
                    debug!(index, "Batch cancelled");
                    return Ok(None);
                }

                if !info.accepts(request.as_ref()) {
                    let error = ArgumentError::new(format!(
                        "batch of '{}' contains a '{}' item",
                        info.name(),
                        request.type_name()
                    ));
                    return Err(self.fail(parent, index, responses, error.into()));
                }

                let item = Arc::new(parent.for_batch_item(index));
                match self.host.execute(item, request).await {
                    Ok(Outcome::Completed(response) | Outcome::ShortCircuited(Some(response))) => {
                        responses.push(response)
                    }
                    Ok(Outcome::ShortCircuited(None) | Outcome::Cancelled) => {
                        debug!(index, "Batch item finished without a response");
                        return Ok(None);
                    }
                    Err(error) => return Err(self.fail(parent, index, responses, error)),
                }
            }

            Ok(Some(responses))
        }
        .instrument(span)
        .await
    }

    fn fail(
        &self,
        parent: &RequestContext,
        completed: usize,
        responses: Vec<BoxedDto>,
        error: ServiceError,
    ) -> BatchFailure {
        debug!(completed, error = %error, "Batch stopped by a fault");
        parent.set_header(AUTO_BATCH_COMPLETED_HEADER, completed.to_string());
        BatchFailure {
            completed,
            responses,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde::{Deserialize, Serialize};
    use sluice_core::{AUTO_BATCH_INDEX, Describe, GatewayError, Operation, Verb};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Charge {
        amount: i64,
    }
    impl Describe for Charge {}
    impl Operation for Charge {
        const NAME: &'static str = "Charge";
        type Response = Receipt;
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Receipt {
        index: u64,
        amount: i64,
    }
    impl Describe for Receipt {}

    async fn charge(request: Charge, ctx: Arc<RequestContext>) -> Result<Receipt, ServiceError> {
        if request.amount < 0 {
            return Err(ArgumentError::new("amount must be positive").into());
        }
        let index = ctx
            .item(AUTO_BATCH_INDEX)
            .and_then(|v| v.as_u64())
            .unwrap_or(u64::MAX);
        Ok(Receipt {
            index,
            amount: request.amount,
        })
    }

    fn host() -> Arc<ServiceHost> {
        ServiceHost::builder().handler(charge).build()
    }

    fn parent(host: &ServiceHost) -> Arc<RequestContext> {
        Arc::new(host.new_context(&OperationInfo::of::<Charge>(), Verb::Post))
    }

    fn charges(amounts: &[i64]) -> Vec<BoxedDto> {
        amounts
            .iter()
            .map(|&amount| Box::new(Charge { amount }) as BoxedDto)
            .collect()
    }

    #[tokio::test]
    async fn responses_keep_input_order_and_item_indices() {
        let host = host();
        let parent = parent(&host);
        let info = OperationInfo::of::<Charge>();

        let responses = host
            .execute_batch(&parent, &info, charges(&[10, 20, 30]))
            .await
            .unwrap()
            .unwrap();
        let receipts: Vec<Receipt> = responses
            .into_iter()
            .map(|r| *r.downcast::<Receipt>().unwrap())
            .collect();
        assert_eq!(
            receipts,
            [
                Receipt { index: 0, amount: 10 },
                Receipt { index: 1, amount: 20 },
                Receipt { index: 2, amount: 30 },
            ]
        );
        assert_eq!(parent.header(AUTO_BATCH_COMPLETED_HEADER), None);
    }

    #[tokio::test]
    async fn first_fault_stops_the_batch() {
        let executed = Arc::new(AtomicUsize::new(0));
        let host = {
            let executed = Arc::clone(&executed);
            ServiceHost::builder()
                .handler(charge)
                .filters(move |f| {
                    f.global_request_filter(move |_, _| {
                        executed.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    });
                })
                .build()
        };
        let parent = parent(&host);
        let info = OperationInfo::of::<Charge>();

        let failure = host
            .execute_batch(&parent, &info, charges(&[10, -1, 30]))
            .await
            .unwrap_err();
        assert_eq!(failure.completed, 1);
        assert_eq!(failure.responses.len(), 1);
        assert_eq!(failure.error.status_code(), 400);
        assert_eq!(executed.load(Ordering::SeqCst), 2);
        assert_eq!(
            parent.header(AUTO_BATCH_COMPLETED_HEADER).as_deref(),
            Some("1")
        );
    }

    #[tokio::test]
    async fn mixed_item_types_are_rejected() {
        let host = host();
        let parent = parent(&host);
        let info = OperationInfo::of::<Charge>();

        let mut requests = charges(&[10]);
        requests.push(Box::new(String::from("not a charge")));
        let failure = host
            .execute_batch(&parent, &info, requests)
            .await
            .unwrap_err();
        assert_eq!(failure.completed, 1);
        assert_eq!(failure.error.error_code(), "ArgumentError");
    }

    #[tokio::test]
    async fn oversized_batches_fail_before_any_item_runs() {
        let host = ServiceHost::builder()
            .handler(charge)
            .max_batch_size(2)
            .build();
        let parent = parent(&host);
        let info = OperationInfo::of::<Charge>();

        let failure = host
            .execute_batch(&parent, &info, charges(&[1, 2, 3]))
            .await
            .unwrap_err();
        assert_eq!(failure.completed, 0);
        assert!(failure.responses.is_empty());
        assert_eq!(failure.error.status_code(), 400);

        assert!(
            host.execute_batch(&parent, &info, charges(&[1, 2]))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn cancelled_parent_ends_the_batch() {
        let host = host();
        let parent = parent(&host);
        parent.cancel();

        let result = host
            .execute_batch(&parent, &OperationInfo::of::<Charge>(), charges(&[1, 2]))
            .await;
        assert!(matches!(result, Ok(None)));
    }
    #[tokio::test]
    async fn batch_fault_matches_the_single_call_fault() {
        let rejected = Arc::new(AtomicUsize::new(0));
        let after = Arc::new(AtomicUsize::new(0));
        let host = {
            let rejected = Arc::clone(&rejected);
            let after = Arc::clone(&after);
            ServiceHost::builder()
                .handler(charge)
                .filters(move |f| {
                    f.typed_request_filter::<Charge, _>(|_, _| Ok(()))
                        .typed_request_filter::<Charge, _>(move |_, request| {
                            rejected.fetch_add(1, Ordering::SeqCst);
                            Err(ServiceError::new(
                                402,
                                "PaymentRequired",
                                format!("card declined for {}", request.amount),
                            )
                            .into())
                        })
                        .typed_request_filter::<Charge, _>(move |_, _| {
                            after.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        });
                })
                .build()
        };
        let parent = parent(&host);
        let gateway = host.gateway(&parent);

        let single = gateway.send(Charge { amount: 5 }).await.unwrap_err();
        let batch = gateway
            .send_all(vec![Charge { amount: 5 }; 3])
            .await
            .unwrap_err();
        let (GatewayError::Service(single), GatewayError::Service(batch)) = (single, batch) else {
            panic!("expected structured faults");
        };
        assert_eq!(batch.status_code(), single.status_code());
        assert_eq!(batch.message(), single.message());
        assert_eq!(batch.message(), "card declined for 5");
        assert_eq!(rejected.load(Ordering::SeqCst), 2);

        let failure = host
            .execute_batch(&parent, &OperationInfo::of::<Charge>(), charges(&[5, 5, 5]))
            .await
            .unwrap_err();
        assert_eq!(failure.completed, 0);
        assert!(failure.responses.is_empty());
        assert_eq!(failure.error.to_response(), single.to_response());
        assert_eq!(rejected.load(Ordering::SeqCst), 3);
        assert_eq!(after.load(Ordering::SeqCst), 0);
    }
}
