use alloy::{
    contract::Error as ContractError,
    network::{
        EthereumWallet,
        ReceiptResponse,
    },
    primitives::{
        Address,
        TxHash,
        U256,
    },
    providers::{
        DynProvider,
        Provider,
        ProviderBuilder,
    },
    rpc::types::TransactionReceipt,
    signers::local::PrivateKeySigner,
    transports::{
        RpcError,
        TransportError,
    },
};
use generated_abi::{
    CoinFlipInstance,
    contract_instance,
};
use std::time::Duration;
use tokio::time;
use tracing::{
    debug,
    info,
    warn,
};
use url::Url;

use super::{
    CONFIRMATION_POLL_INTERVAL,
    ChainError,
    ChainGateway,
    Confirmation,
    DEFAULT_CONFIRMATION_TIMEOUT,
    GameReceipt,
    PlayerStats,
    classify_rpc_failure,
};
use crate::session::CoinSide;

/// How transactions get signed.
#[derive(Clone, Debug)]
pub enum Signing {
    /// Keystore key held by this process.
    Local(PrivateKeySigner),
    /// The node signs on behalf of `account` (`eth_sendTransaction`), so the
    /// user approves or rejects in whatever wallet backs the node.
    External(Address),
    ReadOnly,
}

#[derive(Clone)]
pub struct AlloyChainGateway {
    contract: CoinFlipInstance<DynProvider>,
    provider: DynProvider,
    account: Option<Address>,
    poll_interval: Duration,
    confirmation_timeout: Duration,
}

impl AlloyChainGateway {
    pub fn connect(rpc_url: Url, contract_address: Address, signing: Signing) -> Self {
        let (provider, account) = match signing {
            Signing::Local(signer) => {
                let account = signer.address();
                let provider = ProviderBuilder::new()
                    .wallet(EthereumWallet::from(signer))
                    .connect_http(rpc_url)
                    .erased();
                (provider, Some(account))
            }
            Signing::External(account) => {
                let provider = ProviderBuilder::new().connect_http(rpc_url).erased();
                (provider, Some(account))
            }
            Signing::ReadOnly => {
                (ProviderBuilder::new().connect_http(rpc_url).erased(), None)
            }
        };
        info!(%contract_address, ?account, "chain gateway ready");
        Self {
            contract: contract_instance(contract_address, provider.clone()),
            provider,
            account,
            poll_interval: CONFIRMATION_POLL_INTERVAL,
            confirmation_timeout: DEFAULT_CONFIRMATION_TIMEOUT,
        }
    }

    pub fn with_confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.confirmation_timeout = timeout;
        self
    }

    pub fn account(&self) -> Option<Address> {
        self.account
    }

    pub fn contract_address(&self) -> Address {
        *self.contract.address()
    }

    pub async fn deployed_code(&self) -> Result<Vec<u8>, ChainError> {
        let code = self
            .provider
            .get_code_at(self.contract_address())
            .await
            .map_err(|err| ChainError::Connectivity(err.to_string()))?;
        Ok(code.to_vec())
    }

    async fn poll_until_mined(&self, transaction_id: TxHash) -> TransactionReceipt {
        let mut ticker = time::interval(self.poll_interval);
        loop {
            ticker.tick().await;
            match self.provider.get_transaction_receipt(transaction_id).await {
                Ok(Some(receipt)) => return receipt,
                Ok(None) => debug!(%transaction_id, "transaction not mined yet"),
                Err(err) => warn!(%transaction_id, ?err, "receipt poll failed"),
            }
        }
    }
}

impl ChainGateway for AlloyChainGateway {
    async fn min_bet(&self) -> Result<U256, ChainError> {
        self.contract
            .minBet()
            .call()
            .await
            .map_err(|err| ChainError::Connectivity(err.to_string()))
    }

    async fn player_stats(&self, player: Option<Address>) -> Result<PlayerStats, ChainError> {
        let Some(player) = player else {
            return Ok(PlayerStats::default());
        };
        let stats = self
            .contract
            .getPlayerStats(player)
            .call()
            .await
            .map_err(|err| ChainError::Connectivity(err.to_string()))?;
        Ok(PlayerStats {
            total_bets: stats.totalBets,
            total_wins: stats.totalWins,
            total_losses: stats.totalLosses,
            win_rate_bps: stats.winRate,
            total_wagered: stats.totalWagered,
            total_won: stats.totalWon,
            total_lost: stats.totalLost,
            best_win_streak: stats.bestWinStreak,
        })
    }

    async fn submit_flip(&self, side: CoinSide, bet_wei: U256) -> Result<TxHash, ChainError> {
        let account = self
            .account
            .ok_or_else(|| ChainError::Submission("no wallet connected".to_string()))?;
        let pending = self
            .contract
            .flip(side.is_heads())
            .value(bet_wei)
            .from(account)
            .send()
            .await
            .map_err(classify_contract_error)?;
        let transaction_id = *pending.tx_hash();
        info!(%transaction_id, %side, %bet_wei, "flip submitted");
        Ok(transaction_id)
    }

    async fn await_confirmation(
        &self,
        transaction_id: TxHash,
    ) -> Result<Confirmation, ChainError> {
        let receipt = time::timeout(
            self.confirmation_timeout,
            self.poll_until_mined(transaction_id),
        )
        .await
        .map_err(|_| ChainError::ConfirmationTimeout {
            transaction_id,
            waited: self.confirmation_timeout,
        })?;
        if receipt.status() {
            Ok(Confirmation::Mined {
                block_number: receipt.block_number,
            })
        } else {
            Ok(Confirmation::Reverted)
        }
    }

    async fn fetch_receipt(&self, transaction_id: TxHash) -> Result<GameReceipt, ChainError> {
        let receipt = self
            .provider
            .get_transaction_receipt(transaction_id)
            .await
            .map_err(|err| ChainError::Connectivity(err.to_string()))?
            .ok_or(ChainError::ReceiptUnavailable(transaction_id))?;
        Ok(GameReceipt {
            transaction_id,
            block_number: receipt.block_number,
            succeeded: receipt.status(),
            logs: receipt
                .inner
                .logs()
                .iter()
                .map(|log| log.inner.clone())
                .collect(),
        })
    }
}

fn classify_contract_error(err: ContractError) -> ChainError {
    match err {
        ContractError::TransportError(transport) => classify_transport_error(&transport),
        other => ChainError::Submission(other.to_string()),
    }
}

fn classify_transport_error(err: &TransportError) -> ChainError {
    match err {
        RpcError::ErrorResp(payload) => classify_rpc_failure(payload.code, &payload.message),
        RpcError::Transport(kind) => ChainError::Connectivity(kind.to_string()),
        other => ChainError::Submission(other.to_string()),
    }
}
