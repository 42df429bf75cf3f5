//! Single-key devnet wallet.
//!
//! Enumerates dwarf-creation transactions straight from the UTXO table and
//! hands the miners one fixed reward destination. Real key custody is out
//! of scope here.

use std::sync::Arc;

use k256::ecdsa::SigningKey;
use k256::elliptic_curve::rand_core::OsRng;
use lode_consensus::UtxoView;
use lode_core::{
    encode_address, key_id_from_pubkey, Amount, ConsensusParams, KeyId, OutPoint, Script,
};
use lode_miner::{ChainView, DctInfo, DwarfStatus, WalletView};
use tracing::debug;

use crate::chain_store::ChainStore;

pub struct DevWallet {
    key: SigningKey,
    key_id: KeyId,
    store: Arc<ChainStore>,
    params: ConsensusParams,
}

impl DevWallet {
    /// A wallet with a fresh random key.
    pub fn ephemeral(store: Arc<ChainStore>, params: ConsensusParams) -> Self {
        let key = SigningKey::random(&mut OsRng);
        let key_id = key_id_from_pubkey(&key.verifying_key().to_sec1_bytes());
        Self {
            key,
            key_id,
            store,
            params,
        }
    }

    pub fn address(&self) -> String {
        encode_address(&self.key_id)
    }
}

impl WalletView for DevWallet {
    fn dcts(&self) -> Vec<DctInfo> {
        let creation_script = self.params.dwarf_creation_script();
        let community_script = self.params.community_script();
        // Maturity is judged at the height the next block would have.
        let next_height = self.store.tip().height + 1;

        let mut out = Vec::new();
        for (op, rec) in self.store.utxos() {
            if op.vout != 0 {
                continue;
            }
            let script = Script::from_bytes(rec.script_pubkey.clone());
            let Some(reward_key) = script.parse_dct(&creation_script) else {
                continue;
            };
            if reward_key != self.key_id {
                continue;
            }

            // Fold a valid community donation back into the paid amount.
            let mut paid = rec.value;
            let mut community_contrib = false;
            if let Some(donation) = self.store.coin(&OutPoint {
                txid: op.txid,
                vout: 1,
            }) {
                if donation.script_pubkey == community_script {
                    let expected = (paid + donation.value.atoms())
                        / self.params.community_contrib_factor;
                    if donation.value == Amount::from_atoms(expected) {
                        paid += donation.value.atoms();
                        community_contrib = true;
                    }
                }
            }

            let dwarf_count = paid / self.params.dwarf_cost.atoms();
            if dwarf_count == 0 {
                continue;
            }

            let depth = next_height.saturating_sub(rec.height);
            let status = if depth < self.params.dwarf_gestation_blocks {
                DwarfStatus::Immature
            } else if depth > self.params.total_dwarf_lifespan() {
                DwarfStatus::Expired
            } else {
                DwarfStatus::Mature
            };

            out.push(DctInfo {
                txid: op.txid,
                reward_key,
                community_contrib,
                dwarf_count,
                height: rec.height,
                status,
            });
        }
        out
    }

    fn signing_key(&self, key_id: &KeyId) -> Option<SigningKey> {
        (*key_id == self.key_id).then(|| self.key.clone())
    }

    fn mining_script(&self) -> Option<Script> {
        Some(Script::p2pkh(&self.key_id))
    }

    fn keep_script(&self) {
        // One fixed key; nothing reserved, nothing to return.
        debug!("keep_script: devnet wallet key retained");
    }

    fn is_locked(&self) -> bool {
        false
    }
}
