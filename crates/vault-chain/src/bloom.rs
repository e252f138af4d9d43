//! BIP37 bloom filter, grounded on
//! `Vault.cpp::getBloomFilter_unwrapped`'s element selection: every known
//! signing script's payee hash (plus the witness program, and the wrapping
//! P2SH hash for witness accounts), plus every outpoint the vault itself
//! paid out that a peer hasn't reported spent yet.

use bitcoin::blockdata::script::{Instruction, ScriptBuf};

use vault_db::error::VaultError;
use vault_db::store::Store;

const MAX_BLOOM_FILTER_SIZE_BYTES: usize = 36_000;
const MAX_HASH_FUNCS: u32 = 50;
const LN2SQUARED: f64 = 0.4804530139182014246671025263266649717305529515945455;
const LN2: f64 = 0.6931471805599453094172321214581765680755001343602552;

/// A BIP37 bloom filter: the serialized parameters (`data`, `hash_funcs`,
/// `tweak`) a peer needs to replicate the same membership test.
pub struct BloomFilter {
    data: Vec<u8>,
    hash_funcs: u32,
    tweak: u32,
}

impl BloomFilter {
    /// Sized for `num_elements` items at the given false-positive rate,
    /// following Bitcoin Core's `CBloomFilter` constructor formula.
    pub fn new(num_elements: usize, false_positive_rate: f64, tweak: u32) -> Self {
        let n = (num_elements.max(1)) as f64;
        let num_bytes = ((-1.0 / LN2SQUARED * n * false_positive_rate.ln()) / 8.0)
            .max(1.0)
            .min(MAX_BLOOM_FILTER_SIZE_BYTES as f64) as usize;
        let hash_funcs = (((num_bytes * 8) as f64 / n * LN2) as u32).clamp(1, MAX_HASH_FUNCS);
        BloomFilter { data: vec![0u8; num_bytes], hash_funcs, tweak }
    }

    fn empty(tweak: u32) -> Self {
        BloomFilter { data: Vec::new(), hash_funcs: 0, tweak }
    }

    pub fn insert(&mut self, element: &[u8]) {
        if self.data.is_empty() {
            return;
        }
        for i in 0..self.hash_funcs {
            let idx = self.bit_index(i, element);
            self.data[idx / 8] |= 1 << (idx % 8);
        }
    }

    pub fn contains(&self, element: &[u8]) -> bool {
        if self.data.is_empty() {
            return false;
        }
        (0..self.hash_funcs).all(|i| {
            let idx = self.bit_index(i, element);
            self.data[idx / 8] & (1 << (idx % 8)) != 0
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn hash_funcs(&self) -> u32 {
        self.hash_funcs
    }

    pub fn tweak(&self) -> u32 {
        self.tweak
    }

    fn bit_index(&self, hash_num: u32, data: &[u8]) -> usize {
        let seed = hash_num.wrapping_mul(0xFBA4C795).wrapping_add(self.tweak);
        (murmur3_32(data, seed) as usize) % (self.data.len() * 8)
    }
}

/// MurmurHash3 (x86, 32-bit), the hash BIP37 mandates for filter indices.
fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    const C1: u32 = 0xcc9e2d51;
    const C2: u32 = 0x1b873593;

    let mut h1 = seed;
    let chunks = data.chunks_exact(4);
    let tail = chunks.remainder();
    for chunk in chunks {
        let mut k1 = u32::from_le_bytes(chunk.try_into().unwrap());
        k1 = k1.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h1 ^= k1;
        h1 = h1.rotate_left(13).wrapping_mul(5).wrapping_add(0xe6546b64);
    }

    let mut k1 = 0u32;
    for (i, &b) in tail.iter().enumerate() {
        k1 ^= (b as u32) << (8 * i);
    }
    if !tail.is_empty() {
        k1 = k1.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h1 ^= k1;
    }

    h1 ^= data.len() as u32;
    h1 ^= h1 >> 16;
    h1 = h1.wrapping_mul(0x85ebca6b);
    h1 ^= h1 >> 13;
    h1 = h1.wrapping_mul(0xc2b2ae35);
    h1 ^= h1 >> 16;
    h1
}

/// The single data push inside a standard P2SH/P2WSH scriptPubKey — the
/// payee hash a full node actually matches a bloom filter element against,
/// rather than the whole script (which a node never treats as one push).
fn script_push_data(script: &ScriptBuf) -> Option<Vec<u8>> {
    script.instructions().filter_map(|i| i.ok()).find_map(|instr| match instr {
        Instruction::PushBytes(b) => Some(b.as_bytes().to_vec()),
        _ => None,
    })
}

/// Builds the vault's bloom filter. Empty element set yields an
/// empty filter, matching `Coin::BloomFilter()`'s default-constructed
/// no-op behavior — callers should treat that as "don't filter".
pub fn build_bloom_filter(store: &dyn Store, false_positive_rate: f64, tweak: u32) -> Result<BloomFilter, VaultError> {
    let mut elements: Vec<Vec<u8>> = Vec::new();

    for account in store.all_accounts()? {
        let account_id = account.id.expect("persisted account has an id");
        for bin in store.bins_for_account(account_id)? {
            let bin_id = bin.id.expect("persisted bin has an id");
            for script in store.scripts_for_bin(bin_id)? {
                let txoutscript = ScriptBuf::from(script.txoutscript.clone());
                if let Some(payee_hash) = script_push_data(&txoutscript) {
                    elements.push(payee_hash);
                }

                if account.pattern.uses_witness() {
                    let redeem_script = ScriptBuf::from(script.redeem_script.clone());
                    let witness_program = ScriptBuf::new_p2wsh(&redeem_script.wscript_hash());
                    if let Some(program_hash) = script_push_data(&witness_program) {
                        elements.push(program_hash);
                    }
                } else {
                    elements.push(script.redeem_script.clone());
                }
            }
        }

        for (_, txout) in store.unspent_txouts_sent_by_account(account_id)? {
            if let Some(tx) = store.get_tx(txout.tx_id)? {
                let mut outpoint = tx.signed_hash.to_vec();
                outpoint.extend_from_slice(&txout.tx_index.to_le_bytes());
                elements.push(outpoint);
            }
        }
    }

    if elements.is_empty() {
        return Ok(BloomFilter::empty(tweak));
    }

    let mut filter = BloomFilter::new(elements.len(), false_positive_rate, tweak);
    for element in &elements {
        filter.insert(element);
    }
    Ok(filter)
}

/// The vault's own scriptPubKeys, as literal scripts rather than the hashed
/// bloom elements `build_bloom_filter` produces. A backend with no bloom
/// filter concept (Electrum) uses these directly, one `script_get_history`
/// call per script.
pub fn watched_scripts(store: &dyn Store) -> Result<Vec<ScriptBuf>, VaultError> {
    let mut scripts = Vec::new();
    for account in store.all_accounts()? {
        let account_id = account.id.expect("persisted account has an id");
        for bin in store.bins_for_account(account_id)? {
            let bin_id = bin.id.expect("persisted bin has an id");
            for script in store.scripts_for_bin(bin_id)? {
                scripts.push(ScriptBuf::from(script.txoutscript.clone()));
            }
        }
    }
    Ok(scripts)
}
