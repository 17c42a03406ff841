use std::sync::Arc;

use alloy::consensus::{SignableTransaction, Signed, TxEnvelope};
use alloy_primitives::{Address, Signature, SignatureError};
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::FailurePolicy;
use crate::error::{FailureClass, PipelineError, PipelineResult, Stage};
use crate::provider::ChainClient;
use crate::retry::RetryPolicy;
use crate::types::{ResolvedRecord, TransactionReference};

/// Receiving end of the reference channel, shared by every resolver
pub type SharedReceiver = Arc<Mutex<Receiver<TransactionReference>>>;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResolverStats {
    pub resolved: usize,
    /// References whose transaction the node did not know
    pub absent: usize,
    /// References dropped after a local or skipped fatal failure
    pub skipped: usize,
}

/// Turns transaction references into sender/timestamp records
pub struct TransactionResolver<C> {
    client: Arc<C>,
    retry: RetryPolicy,
    policy: FailurePolicy,
    token: CancellationToken,
}

impl<C: ChainClient> TransactionResolver<C> {
    pub fn new(
        client: Arc<C>,
        retry: RetryPolicy,
        policy: FailurePolicy,
        token: CancellationToken,
    ) -> Self {
        Self {
            client,
            retry,
            policy,
            token,
        }
    }

    /// Consumes references until the channel is closed and drained
    #[instrument(name = "resolve", skip_all)]
    pub async fn run(
        self,
        refs: SharedReceiver,
        records: Sender<ResolvedRecord>,
    ) -> PipelineResult<ResolverStats> {
        let mut stats = ResolverStats::default();

        loop {
            let next = tokio::select! {
                _ = self.token.cancelled() => return Err(PipelineError::Cancelled),
                next = async { refs.lock().await.recv().await } => next,
            };

            let Some(reference) = next else {
                break;
            };

            match self.resolve(reference).await {
                Ok(record) => {
                    tokio::select! {
                        _ = self.token.cancelled() => return Err(PipelineError::Cancelled),
                        res = records.send(record) => res.map_err(|_| PipelineError::ChannelClosed)?,
                    }
                    stats.resolved += 1;
                }
                Err(err) => match self.policy.handle(&self.token, err)? {
                    FailureClass::Absence => stats.absent += 1,
                    _ => stats.skipped += 1,
                },
            }
        }

        debug!(?stats, "resolver finished");
        Ok(stats)
    }

    /// Looks up the sender and block timestamp of a single transaction
    pub async fn resolve(&self, reference: TransactionReference) -> PipelineResult<ResolvedRecord> {
        let hash = reference.transaction_hash;

        let tx = self
            .retry
            .run(&self.token, Stage::TransactionByHash, || {
                self.client.transaction_by_hash(hash)
            })
            .await?
            .ok_or(PipelineError::TransactionNotFound(hash))?;

        let sender = recover_sender(&tx).map_err(|reason| PipelineError::Recovery { hash, reason })?;

        // TODO: cache timestamps per block hash, most blocks hold several matches
        let block_timestamp = self
            .retry
            .run(&self.token, Stage::BlockByHash, || {
                self.client.block_timestamp(reference.block_hash)
            })
            .await?
            .ok_or(PipelineError::BlockNotFound(reference.block_hash))?;

        Ok(ResolvedRecord {
            sender,
            block_timestamp,
        })
    }
}

/// Recovers the address that signed `tx`, using the signature scheme of its type
pub fn recover_sender(tx: &TxEnvelope) -> Result<Address, String> {
    let res = match tx {
        TxEnvelope::Eip2930(signed) => recover(signed),
        TxEnvelope::Eip1559(signed) => recover(signed),
        TxEnvelope::Legacy(signed) => recover(signed),
        other => return Err(format!("unsupported transaction type {:?}", other.tx_type())),
    };

    res.map_err(|e| e.to_string())
}

fn recover<T: SignableTransaction<Signature>>(
    signed: &Signed<T>,
) -> Result<Address, SignatureError> {
    signed
        .signature()
        .recover_address_from_prehash(&signed.signature_hash())
}

#[cfg(test)]
mod tests {
    use alloy_primitives::B256;
    use rstest::*;
    use tokio::sync::mpsc;

    use super::*;
    use crate::error::ChainError;
    use crate::test_utils::{
        fast_retry, legacy_tx, set_code_tx, signed_tx, signer, SignatureScheme, StubClient,
    };

    fn reference(tx: &TxEnvelope) -> TransactionReference {
        TransactionReference {
            transaction_hash: *tx.tx_hash(),
            block_hash: B256::repeat_byte(0xbb),
        }
    }

    fn resolver(client: StubClient, policy: FailurePolicy) -> TransactionResolver<StubClient> {
        TransactionResolver::new(
            Arc::new(client),
            fast_retry(),
            policy,
            CancellationToken::new(),
        )
    }

    #[rstest]
    #[case(SignatureScheme::Legacy)]
    #[case(SignatureScheme::LegacyNoChainId)]
    #[case(SignatureScheme::AccessList)]
    #[case(SignatureScheme::DynamicFee)]
    fn test_recovers_sender_for_each_type(#[case] scheme: SignatureScheme) {
        let signer = signer();
        let tx = signed_tx(&signer, scheme, 0);

        assert_eq!(recover_sender(&tx).unwrap(), signer.address());
    }

    #[test]
    fn test_rejects_unsupported_type() {
        let tx = set_code_tx(&signer(), 0);

        let err = recover_sender(&tx).unwrap_err();
        assert!(err.contains("unsupported transaction type"), "{err}");
    }

    #[tokio::test]
    async fn test_unsupported_type_is_local_failure() {
        let tx = set_code_tx(&signer(), 0);
        let client = StubClient::default()
            .with_transaction(tx.clone())
            .with_block(B256::repeat_byte(0xbb), 42);

        let err = resolver(client, FailurePolicy::Abort)
            .resolve(reference(&tx))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Recovery { hash, .. } if hash == *tx.tx_hash()));
        assert_eq!(err.class(), FailureClass::Local);
    }

    #[tokio::test]
    async fn test_resolves_sender_and_timestamp() {
        let signer = signer();
        let tx = legacy_tx(&signer, 0);
        let client = StubClient::default()
            .with_transaction(tx.clone())
            .with_block(B256::repeat_byte(0xbb), 1_700_000_000);

        let record = resolver(client, FailurePolicy::Skip)
            .resolve(reference(&tx))
            .await
            .unwrap();

        assert_eq!(record.sender, signer.address());
        assert_eq!(record.block_timestamp, 1_700_000_000);
    }

    #[tokio::test]
    async fn test_resolving_twice_is_idempotent() {
        let signer = signer();
        let tx = signed_tx(&signer, SignatureScheme::DynamicFee, 3);
        let client = StubClient::default()
            .with_transaction(tx.clone())
            .with_block(B256::repeat_byte(0xbb), 42);
        let resolver = resolver(client, FailurePolicy::Skip);

        let first = resolver.resolve(reference(&tx)).await.unwrap();
        let second = resolver.resolve(reference(&tx)).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.to_string(), second.to_string());
    }

    #[tokio::test]
    async fn test_unknown_transaction_is_absent() {
        let tx = legacy_tx(&signer(), 0);
        let client = StubClient::default().with_block(B256::repeat_byte(0xbb), 42);

        let err = resolver(client, FailurePolicy::Abort)
            .resolve(reference(&tx))
            .await
            .unwrap_err();

        assert_eq!(err.class(), FailureClass::Absence);
    }

    #[tokio::test]
    async fn test_unknown_block_is_local_failure() {
        let tx = legacy_tx(&signer(), 0);
        let client = StubClient::default().with_transaction(tx.clone());

        let err = resolver(client, FailurePolicy::Skip)
            .resolve(reference(&tx))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::BlockNotFound(_)));
        assert_eq!(err.class(), FailureClass::Local);
    }

    #[tokio::test]
    async fn test_worker_skips_without_aborting() {
        let signer = signer();
        let good = legacy_tx(&signer, 0);
        let unknown = legacy_tx(&signer, 1);
        let client = StubClient::default()
            .with_transaction(good.clone())
            .with_block(B256::repeat_byte(0xbb), 7);

        let (refs_tx, refs_rx) = mpsc::channel(10);
        let (records_tx, mut records_rx) = mpsc::channel(10);
        refs_tx.send(reference(&unknown)).await.unwrap();
        refs_tx.send(reference(&good)).await.unwrap();
        drop(refs_tx);

        let stats = resolver(client, FailurePolicy::Abort)
            .run(Arc::new(Mutex::new(refs_rx)), records_tx)
            .await
            .unwrap();

        assert_eq!(
            stats,
            ResolverStats {
                resolved: 1,
                absent: 1,
                skipped: 0
            }
        );
        assert_eq!(records_rx.recv().await.unwrap().block_timestamp, 7);
        assert!(records_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_worker_skips_unrecoverable_sender_under_abort() {
        let signer = signer();
        let unsupported = set_code_tx(&signer, 0);
        let good = legacy_tx(&signer, 1);
        let client = StubClient::default()
            .with_transaction(unsupported.clone())
            .with_transaction(good.clone())
            .with_block(B256::repeat_byte(0xbb), 7);

        let (refs_tx, refs_rx) = mpsc::channel(10);
        let (records_tx, mut records_rx) = mpsc::channel(10);
        refs_tx.send(reference(&unsupported)).await.unwrap();
        refs_tx.send(reference(&good)).await.unwrap();
        drop(refs_tx);

        let token = CancellationToken::new();
        let resolver = TransactionResolver::new(
            Arc::new(client),
            fast_retry(),
            FailurePolicy::Abort,
            token.clone(),
        );
        let stats = resolver
            .run(Arc::new(Mutex::new(refs_rx)), records_tx)
            .await
            .unwrap();

        assert_eq!(
            stats,
            ResolverStats {
                resolved: 1,
                absent: 0,
                skipped: 1
            }
        );
        assert!(!token.is_cancelled());
        assert_eq!(records_rx.recv().await.unwrap().sender, signer.address());
        assert!(records_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_worker_aborts_on_fatal_block_lookup() {
        let tx = legacy_tx(&signer(), 0);
        let client = StubClient::default()
            .with_transaction(tx.clone())
            .fail_blocks(ChainError::Http {
                status: 500,
                body: "internal error".into(),
            });

        let (refs_tx, refs_rx) = mpsc::channel(10);
        let (records_tx, _records_rx) = mpsc::channel(10);
        refs_tx.send(reference(&tx)).await.unwrap();
        drop(refs_tx);

        let token = CancellationToken::new();
        let resolver = TransactionResolver::new(
            Arc::new(client),
            fast_retry(),
            FailurePolicy::Abort,
            token.clone(),
        );
        let res = resolver.run(Arc::new(Mutex::new(refs_rx)), records_tx).await;

        assert!(matches!(
            res,
            Err(PipelineError::Remote {
                stage: Stage::BlockByHash,
                ..
            })
        ));
        assert!(token.is_cancelled());
    }
}
