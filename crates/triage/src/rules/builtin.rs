//! Built-in heuristic library.

use super::{Category, Pattern, Probe, Rule, TextPredicate};

fn re(expr: &str) -> Result<Pattern, regex::Error> {
    Pattern::regex(expr)
}

fn ci(needle: &str) -> Pattern {
    Pattern::literal_ci(needle)
}

/// Guard markers that make a nearby privileged operation unremarkable.
fn owner_guards() -> Result<Vec<Pattern>, regex::Error> {
    Ok(vec![
        ci("onlyowner"),
        ci("only_owner"),
        ci("onlyadmin"),
        ci("onlymanyowners"),
        re(r"require\s*\(\s*msg\.sender\s*==")?,
        re(r"if\s*\(\s*msg\.sender\s*!=")?,
        re(r"_checkOwner\s*\(")?,
    ])
}

fn reentrancy_guards() -> Vec<Pattern> {
    vec![
        ci("nonreentrant"),
        ci("reentrancyguard"),
        Pattern::literal("_notEntered"),
        Pattern::literal("_locked"),
        ci("mutex"),
    ]
}

pub(super) fn rules() -> Result<Vec<Rule>, regex::Error> {
    let mut rules = Vec::new();

    let mut pred = TextPredicate::new(re(r"tx\.origin\s*(==|!=)|(==|!=)\s*tx\.origin")?);
    pred.requires.push(re(r"require\s*\(|if\s*\(|assert\s*\(")?);
    rules.push(
        Rule::new("tx-origin-auth", Category::AuthenticationBypass, 4, pred)
            .describe("authorization decided by tx.origin, phishable through an intermediate contract"),
    );

    let mut pred = TextPredicate::new(re(r"\b(selfdestruct|suicide)\s*\(")?);
    pred.window = 6;
    pred.suppressed_by = owner_guards()?;
    rules.push(
        Rule::new("selfdestruct-reachable", Category::AccessControl, 5, pred)
            .describe("selfdestruct without a visible owner guard"),
    );

    let mut pred = TextPredicate::new(re(r"\.delegatecall\s*\(")?);
    pred.requires
        .push(re(r"\b(_to|_target|target|_contract|_impl|msg\.data)\b")?);
    pred.suppressed_by = owner_guards()?;
    pred.window = 0;
    rules.push(
        Rule::new("delegatecall-user-target", Category::AccessControl, 5, pred)
            .describe("delegatecall to an address or payload supplied by the caller"),
    );

    let mut pred = TextPredicate::new(re(r"(\+=|-=|\*=)")?);
    pred.compiler = Some(re(r"v?0\.[4-7]\.")?);
    pred.excluded_by.push(ci("safemath"));
    rules.push(
        Rule::new("unchecked-arithmetic", Category::ArithmeticBoundary, 3, pred)
            .describe("pre-0.8 compiler without SafeMath: arithmetic can wrap"),
    );

    // Nothing before the quotient may contain a slash, so `//` comments never anchor.
    let mut pred = TextPredicate::new(re(r"^[^/]*[\w)\]]\s*/\s*\w+\s*\*\s*\w")?);
    pred.suppressed_by.push(re(r"^\s*\*")?);
    rules.push(
        Rule::new("division-before-multiplication", Category::ArithmeticBoundary, 2, pred)
            .describe("precision loss from dividing before multiplying"),
    );

    let mut pred = TextPredicate::new(re(r"\becrecover\s*\(")?);
    pred.excluded_by = vec![ci("nonce"), ci("replay"), ci("usedsignature"), ci("processed")];
    rules.push(
        Rule::new("ecrecover-replay", Category::AuthenticationBypass, 3, pred)
            .describe("signature recovery with no nonce or replay bookkeeping"),
    );

    let mut pred = TextPredicate::new(re(r"\.call\s*\{\s*value\s*:|\.call\.value\s*\(")?);
    pred.requires.push(re(
        r"(balances?|balanceOf|deposits|shares)\s*\[[^\]]*\]\s*(-=|=\s*0\s*;)",
    )?);
    pred.suppressed_by = reentrancy_guards();
    pred.window = 6;
    rules.push(
        Rule::new("eth-send-before-update", Category::CallbackReentrancy, 4, pred)
            .describe("ether sent next to the balance bookkeeping it should follow"),
    );

    let mut pred = TextPredicate::new(re(
        r"function\s+(uniswapV2Call|uniswapV3SwapCallback|pancakeCall|onFlashLoan|executeOperation|receiveFlashLoan)\s*\(",
    )?);
    pred.suppressed_by = vec![
        re(r"require\s*\(\s*msg\.sender\s*==")?,
        re(r"require\s*\(\s*(sender|initiator)\s*==\s*address\(this\)")?,
        re(r"msg\.sender\s*!=")?,
        ci("onlypool"),
        ci("onlylender"),
    ];
    pred.window = 5;
    rules.push(
        Rule::new("flash-callback-unguarded", Category::CallbackReentrancy, 4, pred)
            .describe("flash-loan or swap callback that does not authenticate its caller"),
    );

    // Signatures ending in `;` are interface declarations, not hooks.
    let mut pred = TextPredicate::new(re(r"function\s+(tokensReceived|tokensToSend)\s*\([^;]*$")?);
    pred.suppressed_by = reentrancy_guards();
    pred.window = 6;
    rules.push(
        Rule::new("erc777-hook-reentrancy", Category::CallbackReentrancy, 4, pred)
            .describe("ERC777 send/receive hook with no reentrancy guard"),
    );

    let mut pred = TextPredicate::new(re(
        r"function\s+(onERC721Received|onERC1155Received|onERC1155BatchReceived)\s*\([^;]*$",
    )?);
    pred.suppressed_by = reentrancy_guards();
    pred.window = 6;
    rules.push(
        Rule::new("nft-receiver-reentrancy", Category::CallbackReentrancy, 2, pred)
            .describe("ERC721/ERC1155 receiver hook with no reentrancy guard"),
    );

    let mut pred = TextPredicate::new(re(r"\.(getReserves|slot0|getAmountsOut)\s*\(")?);
    pred.excluded_by = vec![ci("consult("), ci("observe("), ci("twap"), ci("latestrounddata")];
    rules.push(
        Rule::new("spot-price-oracle", Category::OracleDependence, 3, pred)
            .describe("price read from a manipulable AMM spot reserve"),
    );

    let mut pred = TextPredicate::new(re(r"balanceOf\s*\(\s*address\s*\(\s*this\s*\)\s*\)")?);
    pred.requires.push(re(r"totalSupply")?);
    pred.excluded_by = vec![
        re(r"_?totalSupply(\(\))?\s*==\s*0")?,
        ci("virtual_shares"),
        ci("_decimalsoffset"),
        ci("dead_shares"),
    ];
    pred.window = 8;
    rules.push(
        Rule::new("share-inflation", Category::ArithmeticBoundary, 3, pred)
            .describe("share price derived from a donatable balance with no first-depositor defence"),
    );

    let mut pred = TextPredicate::new(re(
        r"function\s+(setOwner|changeOwner|transferOwnership|setAdmin|changeAdmin)\s*\([^)]*\)\s*(public|external)",
    )?);
    pred.suppressed_by = owner_guards()?;
    pred.window = 3;
    rules.push(
        Rule::new("unprotected-owner-setter", Category::AccessControl, 6, pred)
            .describe("ownership setter without an access check")
            .probe(Probe::stranger_callable(&[
                "setOwner(address)",
                "changeOwner(address)",
                "transferOwnership(address)",
            ])),
    );

    let mut pred = TextPredicate::new(re(r"function\s+(initialize|init)\s*\([^)]*\)\s*(public|external)")?);
    pred.suppressed_by = owner_guards()?;
    pred.suppressed_by.push(re(r"\binitializer\b")?);
    pred.suppressed_by.push(re(r"require\s*\(\s*!\s*_?initialized")?);
    pred.window = 3;
    rules.push(
        Rule::new("unprotected-initializer", Category::AccessControl, 6, pred)
            .describe("initializer that anyone can call again")
            .probe(Probe::CallReturnsZero {
                signature: "owner()".to_string(),
            })
            .probe(Probe::stranger_callable(&[
                "initialize(address)",
                "init(address)",
                "initialize()",
            ])),
    );

    let mut pred = TextPredicate::new(re(r"function\s+withdraw\w*\s*\(")?);
    pred.requires
        .push(re(r"\.transfer\s*\(|\.send\s*\(|\.call\s*\{\s*value|\.call\.value")?);
    pred.suppressed_by = owner_guards()?;
    pred.suppressed_by
        .push(re(r"(balances?|balanceOf|deposits)\s*\[\s*msg\.sender\s*\]")?);
    pred.window = 6;
    rules.push(
        Rule::new("unprotected-withdraw", Category::AccessControl, 7, pred)
            .describe("withdraw path paying out without checking the caller")
            .probe(Probe::stranger_callable(&["withdraw()", "withdrawAll()"])),
    );

    let mut pred = TextPredicate::new(re(
        r"function\s+(upgradeTo|upgradeToAndCall)\s*\([^)]*\)\s*(public|external)",
    )?);
    pred.suppressed_by = owner_guards()?;
    pred.suppressed_by.push(ci("ifadmin"));
    pred.suppressed_by.push(ci("onlyproxyadmin"));
    pred.window = 3;
    rules.push(
        Rule::new("unprotected-upgrade", Category::AccessControl, 8, pred)
            .describe("proxy upgrade entry point without an admin check")
            .probe(Probe::stranger_callable(&[
                "upgradeTo(address)",
                "upgradeToAndCall(address,bytes)",
                "changeAdmin(address)",
            ])),
    );

    let pred = TextPredicate::new(re(r"(?i)\b(erc1967\w*|_implementation_slot)\b|eip1967\.proxy")?);
    rules.push(
        Rule::new("uninitialized-implementation", Category::AccessControl, 4, pred)
            .describe("EIP-1967 proxy whose implementation contract anyone can still initialize")
            .probe(Probe::Eip1967Proxy)
            .probe(Probe::implementation_callable(&["initialize()", "initialize(address)"])),
    );

    let mut pred = TextPredicate::new(re(r"function\s+initWallet\s*\(")?);
    pred.suppressed_by.push(Pattern::literal("only_uninitialized"));
    pred.window = 2;
    rules.push(
        Rule::new("uninitialized-wallet-library", Category::AccessControl, 8, pred)
            .describe("multisig library whose owner count is still zero, so initWallet is open")
            .probe(Probe::StorageIsZero { slot: 0 })
            .probe(Probe::stranger_callable(&[
                "initWallet(address[],uint256,uint256)",
            ])),
    );

    Ok(rules)
}
