//! Target list parsing.

use contract_triage::ContractTarget;
use contract_triage::config::parse_address;
use contract_triage::types::eth_to_wei;

/// Parse `0x<address>[,<balance in ETH>]` lines. `#` starts a comment.
pub fn parse_targets(text: &str, chain_id: u64) -> Result<Vec<ContractTarget>, String> {
    let mut targets = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split(',').map(str::trim);
        let address = fields.next().unwrap_or_default();
        let address = parse_address(address).map_err(|e| format!("line {}: {e}", idx + 1))?;
        let balance = match fields.next().filter(|f| !f.is_empty()) {
            Some(eth) => {
                let eth: f64 = eth
                    .parse()
                    .map_err(|e| format!("line {}: invalid balance {eth}: {e}", idx + 1))?;
                eth_to_wei(eth)
            }
            None => Default::default(),
        };
        targets.push(ContractTarget::new(address, balance, chain_id));
    }
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethereum_types::{Address, U256};

    #[test]
    fn parses_addresses_balances_and_comments() {
        let text = "# wallets above 20 ETH\n\
                    0x863df6bfa4469f3ead0be8f9f2aae51c91a907b4, 513.7\n\
                    \n\
                    0x00000000000000000000000000000000000000ab  # no balance\n";
        let targets = parse_targets(text, 1).unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].declared_balance, eth_to_wei(513.7));
        assert_eq!(targets[1].address, Address::from_low_u64_be(0xab));
        assert_eq!(targets[1].declared_balance, U256::zero());
        assert_eq!(targets[1].chain_id, 1);
    }

    #[test]
    fn reports_line_of_bad_entry() {
        let err = parse_targets("0x01\n", 1).unwrap_err();
        assert!(err.starts_with("line 1"));
        let err = parse_targets(
            "0x00000000000000000000000000000000000000ab\n0x00000000000000000000000000000000000000cd,lots\n",
            1,
        )
        .unwrap_err();
        assert!(err.contains("line 2"));
        assert!(err.contains("invalid balance"));
    }
}
