//! Parameterized SQL against the cardano-db-sync schema.
//!
//! Quantities are cast to text in SQL so arbitrary-precision numerics never
//! have to squeeze through a native integer type. Assets travel as
//! hex-concatenated policy ∥ name.

/// Multiasset bundle of one output as a JSON array, or NULL when the output
/// only carries lovelace.
const OUTPUT_ASSETS: &str = r#"
    (SELECT json_agg(json_build_object(
                'asset', encode(ma.policy, 'hex') || encode(ma.name, 'hex'),
                'quantity', mto.quantity::text))
       FROM ma_tx_out mto
       JOIN multi_asset ma ON ma.id = mto.ident
      WHERE mto.tx_out_id = tx_out.id)::text
"#;

const OUTPUT_DATUM_HASH: &str = "encode(tx_out.data_hash, 'hex')";

const OUTPUT_INLINE_DATUM: &str = r#"
    (SELECT encode(datum.bytes, 'hex')
       FROM datum
      WHERE datum.hash = tx_out.data_hash)
"#;

const OUTPUT_REF_SCRIPT: &str = r#"
    (SELECT encode(script.bytes, 'hex')
       FROM script
      WHERE script.id = tx_out.reference_script_id)
"#;

pub fn address_utxos() -> String {
    format!(
        r#"
        SELECT encode(tx.hash, 'hex'),
               tx_out.index::int,
               tx_out.value::text,
               {OUTPUT_ASSETS},
               {OUTPUT_DATUM_HASH},
               {OUTPUT_INLINE_DATUM},
               {OUTPUT_REF_SCRIPT}
          FROM tx_out
          JOIN tx ON tx.id = tx_out.tx_id
         WHERE tx_out.address = $1
           AND tx_out.consumed_by_tx_id IS NULL
        "#
    )
}

pub fn address_utxos_with_asset() -> String {
    format!(
        r#"
        SELECT encode(tx.hash, 'hex'),
               tx_out.index::int,
               tx_out.value::text,
               {OUTPUT_ASSETS},
               {OUTPUT_DATUM_HASH},
               {OUTPUT_INLINE_DATUM},
               {OUTPUT_REF_SCRIPT}
          FROM tx_out
          JOIN tx ON tx.id = tx_out.tx_id
         WHERE tx_out.address = $1
           AND tx_out.consumed_by_tx_id IS NULL
           AND EXISTS (SELECT 1
                         FROM ma_tx_out mto
                         JOIN multi_asset ma ON ma.id = mto.ident
                        WHERE mto.tx_out_id = tx_out.id
                          AND encode(ma.policy, 'hex') || encode(ma.name, 'hex') = lower($2))
        "#
    )
}

pub fn utxo() -> String {
    format!(
        r#"
        SELECT tx_out.address,
               tx_out.value::text,
               {OUTPUT_ASSETS},
               {OUTPUT_DATUM_HASH},
               {OUTPUT_INLINE_DATUM},
               {OUTPUT_REF_SCRIPT},
               (SELECT encode(consumer.hash, 'hex')
                  FROM tx consumer
                 WHERE consumer.id = tx_out.consumed_by_tx_id)
          FROM tx_out
          JOIN tx ON tx.id = tx_out.tx_id
         WHERE encode(tx.hash, 'hex') = lower($1)
           AND tx_out.index = $2
        "#
    )
}

pub const ASSET_ADDRESSES: &str = r#"
    SELECT tx_out.address,
           sum(mto.quantity)::text
      FROM ma_tx_out mto
      JOIN multi_asset ma ON ma.id = mto.ident
      JOIN tx_out ON tx_out.id = mto.tx_out_id
     WHERE encode(ma.policy, 'hex') || encode(ma.name, 'hex') = lower($1)
       AND tx_out.consumed_by_tx_id IS NULL
     GROUP BY tx_out.address
"#;

pub const POLICY_ASSETS: &str = r#"
    SELECT encode(ma.policy, 'hex') || encode(ma.name, 'hex'),
           sum(mint.quantity)::text
      FROM ma_tx_mint mint
      JOIN multi_asset ma ON ma.id = mint.ident
     WHERE encode(ma.policy, 'hex') = lower($1)
     GROUP BY ma.policy, ma.name
    HAVING sum(mint.quantity) > 0
"#;

pub const TX_BLOCK_INFO: &str = r#"
    SELECT encode(tx.hash, 'hex'),
           encode(block.hash, 'hex'),
           block.block_no::int,
           extract(epoch FROM block.time)::bigint,
           block.slot_no::bigint,
           tx.block_index::int
      FROM tx
      JOIN block ON block.id = tx.block_id
     WHERE encode(tx.hash, 'hex') = lower($1)
"#;

pub const FILTER_MISSING_TXS: &str = r#"
    SELECT ids.id
      FROM unnest($1::text[]) AS ids(id)
     WHERE NOT EXISTS (SELECT 1
                         FROM tx
                        WHERE tx.hash = decode(ids.id, 'hex'))
"#;

/// Hash indices over the hex-rendered columns the other queries filter on.
/// db-sync itself only indexes the raw bytea columns.
pub const CREATE_INDICES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_block_hash_hex ON block USING HASH (encode(hash, 'hex'))",
    "CREATE INDEX IF NOT EXISTS idx_datum_hash_hex ON datum USING HASH (encode(hash, 'hex'))",
    "CREATE INDEX IF NOT EXISTS idx_ma_tx_mint_ident ON ma_tx_mint USING btree (ident)",
    "CREATE INDEX IF NOT EXISTS idx_ma_tx_out_ident ON ma_tx_out USING btree (ident)",
    "CREATE INDEX IF NOT EXISTS idx_multi_asset_policy_hex ON multi_asset USING HASH (encode(policy, 'hex'))",
    "CREATE INDEX IF NOT EXISTS idx_multi_asset_policy_name_hex ON multi_asset USING HASH ((encode(policy, 'hex') || encode(name, 'hex')))",
    "CREATE INDEX IF NOT EXISTS idx_redeemer_data_hash_hex ON redeemer_data USING HASH (encode(hash, 'hex'))",
    "CREATE INDEX IF NOT EXISTS idx_redeemer_script_hash_hex ON redeemer USING HASH (encode(script_hash, 'hex'))",
    "CREATE INDEX IF NOT EXISTS idx_redeemer_tx_id ON redeemer USING btree (tx_id)",
    "CREATE INDEX IF NOT EXISTS idx_script_hash_hex ON script USING HASH (encode(hash, 'hex'))",
    "CREATE INDEX IF NOT EXISTS idx_tx_hash_hex ON tx USING HASH (encode(hash, 'hex'))",
    "CREATE INDEX IF NOT EXISTS idx_tx_out_address ON tx_out USING HASH (address)",
];
