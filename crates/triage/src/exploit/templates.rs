//! Built-in exploit templates.

use super::{ArgSpec, ExploitTemplate, StepExpectation, TemplateStep};

/// Gas allowance for the privileged call made once control is taken.
const OWNER_FOLLOW_UP_GAS: u64 = 50_000;

pub fn builtin_templates() -> Vec<ExploitTemplate> {
    vec![
        ExploitTemplate {
            id: "uninitialized-wallet-takeover".to_string(),
            trigger_rule: "uninitialized-wallet-library".to_string(),
            description: "claim an uninitialized multisig, then execute a transfer of its balance"
                .to_string(),
            steps: vec![
                TemplateStep::succeed("claim-ownership", &["initWallet(address[],uint256,uint256)"]),
                TemplateStep::expect_revert("execute-gated-before-claim", &["execute(address,uint256,bytes)"])
                    .with_args(vec![ArgSpec::Caller, ArgSpec::TargetBalance, ArgSpec::EmptyBytes]),
            ],
            follow_up_gas: OWNER_FOLLOW_UP_GAS,
        },
        ExploitTemplate {
            id: "unprotected-owner-takeover".to_string(),
            trigger_rule: "unprotected-owner-setter".to_string(),
            description: "replace the owner with the caller".to_string(),
            steps: vec![TemplateStep::succeed(
                "seize-ownership",
                &[
                    "setOwner(address)",
                    "changeOwner(address)",
                    "transferOwnership(address)",
                ],
            )],
            follow_up_gas: OWNER_FOLLOW_UP_GAS,
        },
        ExploitTemplate {
            id: "unprotected-upgrade-takeover".to_string(),
            trigger_rule: "unprotected-upgrade".to_string(),
            description: "point the proxy at a caller-chosen implementation".to_string(),
            steps: vec![TemplateStep::succeed(
                "replace-implementation",
                &["upgradeTo(address)", "upgradeToAndCall(address,bytes)"],
            )],
            follow_up_gas: OWNER_FOLLOW_UP_GAS,
        },
        ExploitTemplate {
            id: "open-withdraw-drain".to_string(),
            trigger_rule: "unprotected-withdraw".to_string(),
            description: "call the unguarded withdraw path directly".to_string(),
            steps: vec![TemplateStep::succeed("drain", &["withdraw()", "withdrawAll()"])],
            follow_up_gas: 0,
        },
        ExploitTemplate {
            id: "unprotected-initializer-takeover".to_string(),
            trigger_rule: "unprotected-initializer".to_string(),
            description: "re-run the initializer with the caller as owner".to_string(),
            steps: vec![TemplateStep::succeed(
                "reinitialize",
                &["initialize(address)", "init(address)", "initialize()"],
            )],
            follow_up_gas: OWNER_FOLLOW_UP_GAS,
        },
    ]
}
