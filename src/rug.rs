//! Pre-entry rug heuristics
//!
//! Inspects the mint account before committing funds. Returns true when
//! the token looks suspicious.

use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::program_option::COption;
use solana_sdk::program_pack::Pack;
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Check the mint account's authority state. A renounced mint authority
/// on a just-launched token is treated as suspicious here.
pub async fn check_rug_pull(client: &RpcClient, mint: &str) -> Result<bool> {
    let mint_pk =
        Pubkey::from_str(mint).map_err(|e| Error::Internal(format!("bad mint {mint}: {e}")))?;
    let account = client.get_account(&mint_pk).await?;
    let state = spl_token::state::Mint::unpack(&account.data)
        .map_err(|e| Error::Rpc(format!("mint decode failed: {e}")))?;

    Ok(matches!(state.mint_authority, COption::None))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packed_mint(authority: COption<Pubkey>) -> Vec<u8> {
        let state = spl_token::state::Mint {
            mint_authority: authority,
            supply: 1_000_000,
            decimals: 6,
            is_initialized: true,
            freeze_authority: COption::None,
        };
        let mut buf = vec![0u8; spl_token::state::Mint::LEN];
        state.pack_into_slice(&mut buf);
        buf
    }

    #[test]
    fn test_renounced_authority_flags_suspicious() {
        let data = packed_mint(COption::None);
        let state = spl_token::state::Mint::unpack(&data).unwrap();
        assert!(matches!(state.mint_authority, COption::None));
    }

    #[test]
    fn test_live_authority_passes() {
        let data = packed_mint(COption::Some(Pubkey::new_unique()));
        let state = spl_token::state::Mint::unpack(&data).unwrap();
        assert!(matches!(state.mint_authority, COption::Some(_)));
    }
}
