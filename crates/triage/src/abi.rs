//! Minimal ABI helpers: selectors, call-data encoding and revert decoding.
//!
//! Only the argument shapes used by probes and exploit templates are
//! supported. Anything richer belongs in a real ABI library.

use bytes::Bytes;
use ethereum_types::{Address, U256};
use sha3::{Digest, Keccak256};

/// `Error(string)` revert payload selector.
const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

/// A concrete ABI argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiArg {
    Address(Address),
    Uint(U256),
    Bool(bool),
    Bytes(Vec<u8>),
    AddressArray(Vec<Address>),
}

impl AbiArg {
    fn is_dynamic(&self) -> bool {
        matches!(self, AbiArg::Bytes(_) | AbiArg::AddressArray(_))
    }
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// 4-byte function selector of a canonical signature such as `transfer(address,uint256)`.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Parse a hex selector (`0x12345678` or `12345678`).
pub fn parse_selector(hex_str: &str) -> Option<[u8; 4]> {
    let s = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    let bytes = hex::decode(s).ok()?;
    bytes.try_into().ok()
}

/// Encode a call: selector of `signature` followed by the ABI-encoded arguments.
pub fn encode_call(signature: &str, args: &[AbiArg]) -> Bytes {
    let mut out = selector(signature).to_vec();
    out.extend_from_slice(&encode_args(args));
    Bytes::from(out)
}

/// Parameter types of a canonical signature, e.g. `["address[]", "uint256"]`.
pub fn param_types(signature: &str) -> Vec<&str> {
    let inner = signature
        .split_once('(')
        .and_then(|(_, rest)| rest.strip_suffix(')'))
        .unwrap_or("");
    if inner.is_empty() {
        return Vec::new();
    }
    inner.split(',').map(str::trim).collect()
}

/// Encode `signature` with placeholder arguments that make `caller` the
/// beneficiary: addresses become `caller`, address arrays `[caller]`,
/// integers `1`, booleans `true` and byte strings empty.
pub fn encode_probe_call(signature: &str, caller: Address) -> Bytes {
    let args: Vec<AbiArg> = param_types(signature)
        .into_iter()
        .map(|ty| match ty {
            "address" => AbiArg::Address(caller),
            "address[]" => AbiArg::AddressArray(vec![caller]),
            "bool" => AbiArg::Bool(true),
            "bytes" | "string" => AbiArg::Bytes(Vec::new()),
            _ => AbiArg::Uint(U256::one()),
        })
        .collect();
    encode_call(signature, &args)
}

/// Encode a bare selector with no arguments.
pub fn encode_selector(sel: [u8; 4]) -> Bytes {
    Bytes::copy_from_slice(&sel)
}

fn encode_args(args: &[AbiArg]) -> Vec<u8> {
    let head_len = args.len() * 32;
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for arg in args {
        if arg.is_dynamic() {
            head.extend_from_slice(&u256_word(U256::from(head_len + tail.len())));
            tail.extend_from_slice(&encode_dynamic(arg));
        } else {
            head.extend_from_slice(&encode_static(arg));
        }
    }

    head.extend_from_slice(&tail);
    head
}

fn encode_static(arg: &AbiArg) -> [u8; 32] {
    match arg {
        AbiArg::Address(addr) => address_word(*addr),
        AbiArg::Uint(value) => u256_word(*value),
        AbiArg::Bool(flag) => u256_word(U256::from(u8::from(*flag))),
        // dynamic kinds never reach here
        AbiArg::Bytes(_) | AbiArg::AddressArray(_) => [0u8; 32],
    }
}

fn encode_dynamic(arg: &AbiArg) -> Vec<u8> {
    let mut out = Vec::new();
    match arg {
        AbiArg::Bytes(data) => {
            out.extend_from_slice(&u256_word(U256::from(data.len())));
            out.extend_from_slice(data);
            let pad = (32 - data.len() % 32) % 32;
            out.extend(std::iter::repeat_n(0u8, pad));
        }
        AbiArg::AddressArray(items) => {
            out.extend_from_slice(&u256_word(U256::from(items.len())));
            for item in items {
                out.extend_from_slice(&address_word(*item));
            }
        }
        _ => {}
    }
    out
}

fn u256_word(value: U256) -> [u8; 32] {
    value.to_big_endian()
}

fn address_word(addr: Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(addr.as_bytes());
    word
}

/// Decode an `Error(string)` revert payload. Returns `None` for custom errors or panics.
pub fn decode_revert_reason(data: &[u8]) -> Option<String> {
    let body = data.strip_prefix(&ERROR_STRING_SELECTOR)?;
    let len_word = body.get(32..64)?;
    let len = U256::from_big_endian(len_word);
    if len > U256::from(body.len()) {
        return None;
    }
    let len = len.as_usize();
    let text = body.get(64..64 + len)?;
    String::from_utf8(text.to_vec()).ok()
}

/// Interpret the low 20 bytes of a 32-byte word as an address.
pub fn word_to_address(word: U256) -> Address {
    let bytes = word.to_big_endian();
    Address::from_slice(&bytes[12..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_selectors() {
        assert_eq!(selector("owner()"), [0x8d, 0xa5, 0xcb, 0x5b]);
        assert_eq!(selector("withdraw()"), [0x3c, 0xcf, 0xd6, 0x0b]);
        assert_eq!(selector("setOwner(address)"), [0x13, 0xaf, 0x40, 0x35]);
        assert_eq!(selector("transferOwnership(address)"), [0xf2, 0xfd, 0xe3, 0x8b]);
        assert_eq!(
            selector("execute(address,uint256,bytes)"),
            [0xb6, 0x1d, 0x27, 0xf6]
        );
    }

    #[test]
    fn parse_selector_accepts_prefix() {
        assert_eq!(parse_selector("0x12345678"), Some([0x12, 0x34, 0x56, 0x78]));
        assert_eq!(parse_selector("87654321"), Some([0x87, 0x65, 0x43, 0x21]));
        assert_eq!(parse_selector("0x1234"), None);
        assert_eq!(parse_selector("0xzzzzzzzz"), None);
    }

    #[test]
    fn static_argument_layout() {
        let data = encode_call(
            "setOwner(address)",
            &[AbiArg::Address(Address::from_low_u64_be(0x42))],
        );
        assert_eq!(data.len(), 4 + 32);
        assert_eq!(data[4 + 31], 0x42);
        assert!(data[4..4 + 12].iter().all(|b| *b == 0));
    }

    #[test]
    fn dynamic_arguments_use_offsets() {
        // execute(address,uint256,bytes) with empty bytes: 3 head words + length word
        let data = encode_call(
            "execute(address,uint256,bytes)",
            &[
                AbiArg::Address(Address::from_low_u64_be(1)),
                AbiArg::Uint(U256::from(5)),
                AbiArg::Bytes(Vec::new()),
            ],
        );
        assert_eq!(data.len(), 4 + 4 * 32);
        // offset of the bytes tail = 3 * 32
        assert_eq!(data[4 + 2 * 32 + 31], 0x60);

        let wallet_init = encode_call(
            "initWallet(address[],uint256,uint256)",
            &[
                AbiArg::AddressArray(vec![Address::from_low_u64_be(7)]),
                AbiArg::Uint(U256::one()),
                AbiArg::Uint(U256::zero()),
            ],
        );
        // 3 head words + array length + one element
        assert_eq!(wallet_init.len(), 4 + 5 * 32);
        assert_eq!(wallet_init[4 + 31], 0x60);
        assert_eq!(wallet_init[4 + 3 * 32 + 31], 1);
        assert_eq!(wallet_init[4 + 4 * 32 + 31], 7);
    }

    #[test]
    fn probe_calls_use_caller_placeholders() {
        assert_eq!(
            param_types("initWallet(address[],uint256,uint256)"),
            vec!["address[]", "uint256", "uint256"]
        );
        assert!(param_types("withdraw()").is_empty());

        let caller = Address::from_low_u64_be(0xbeef);
        let data = encode_probe_call("setOwner(address)", caller);
        assert_eq!(
            data,
            encode_call("setOwner(address)", &[AbiArg::Address(caller)])
        );
        assert_eq!(encode_probe_call("withdraw()", caller).len(), 4);
    }

    #[test]
    fn bytes_are_padded() {
        let data = encode_call("f(bytes)", &[AbiArg::Bytes(vec![1, 2, 3])]);
        assert_eq!(data.len(), 4 + 32 + 32 + 32);
    }

    #[test]
    fn revert_reason_round_trip() {
        let mut payload = ERROR_STRING_SELECTOR.to_vec();
        payload.extend_from_slice(&u256_word(U256::from(32)));
        payload.extend_from_slice(&u256_word(U256::from(9)));
        let mut text = b"not owner".to_vec();
        text.resize(32, 0);
        payload.extend_from_slice(&text);
        assert_eq!(decode_revert_reason(&payload).as_deref(), Some("not owner"));
        assert_eq!(decode_revert_reason(&[0xde, 0xad, 0xbe, 0xef]), None);
    }

    #[test]
    fn word_to_address_takes_low_bytes() {
        let word = U256::from(0xabcdu64);
        assert_eq!(word_to_address(word), Address::from_low_u64_be(0xabcd));
    }
}
