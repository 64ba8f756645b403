/// Address Resolution
///
/// Canonical receiver/sender rules. These are consensus-relevant: every
/// replica must pick the same addresses for the same transaction, so the
/// rules depend only on output order and on the addresses the node supplied.
/// Outputs the node could not parse contribute no address.

use crate::constants::OP_RETURN;
use crate::types::Transaction;

fn is_op_return(script: &[u8]) -> bool {
    script.first() == Some(&OP_RETURN)
}

/// Standard outputs in order: not OP_RETURN, address known.
fn standard_outputs(tx: &Transaction) -> impl Iterator<Item = &str> {
    tx.outputs
        .iter()
        .filter(|o| !is_op_return(&o.script))
        .filter_map(|o| o.address.as_deref())
}

/// Receiver of a mint (and deployer of a deploy): owner of the first
/// standard output.
pub fn first_standard_output(tx: &Transaction) -> Option<&str> {
    standard_outputs(tx).next()
}

/// Receivers of a multi-receiver transfer: owners of the first `n` standard
/// outputs in output order. Returns None when the transaction has fewer
/// resolvable standard outputs than receivers requested.
pub fn standard_output_receivers(tx: &Transaction, n: usize) -> Option<Vec<String>> {
    let receivers: Vec<String> = standard_outputs(tx).take(n).map(str::to_owned).collect();
    if receivers.len() == n {
        Some(receivers)
    } else {
        None
    }
}

/// Sender of a transfer: owner of the first input whose previous output's
/// address resolved.
pub fn resolve_sender(tx: &Transaction) -> Option<&str> {
    tx.inputs.iter().find_map(|i| i.address.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::build_op_return_script;
    use crate::types::{TxInput, TxOutput};

    fn output(address: Option<&str>) -> TxOutput {
        TxOutput {
            value_sats: 546,
            script: vec![0x76, 0xa9],
            address: address.map(str::to_owned),
        }
    }

    fn op_return_output() -> TxOutput {
        TxOutput {
            value_sats: 0,
            script: build_op_return_script(b"{\"p\":\"brc-20\"}"),
            address: None,
        }
    }

    fn input(address: Option<&str>) -> TxInput {
        TxInput {
            prev_txid: Some("00".repeat(32)),
            prev_vout: Some(0),
            address: address.map(str::to_owned),
            coinbase: false,
        }
    }

    #[test]
    fn test_first_standard_output_skips_op_return() {
        let tx = Transaction {
            txid: "ab".repeat(32),
            inputs: vec![],
            outputs: vec![op_return_output(), output(Some("addrB")), output(Some("addrC"))],
        };
        assert_eq!(first_standard_output(&tx), Some("addrB"));
    }

    #[test]
    fn test_first_standard_output_skips_unparseable() {
        let tx = Transaction {
            txid: "ab".repeat(32),
            inputs: vec![],
            outputs: vec![output(None), output(Some("addrC"))],
        };
        assert_eq!(first_standard_output(&tx), Some("addrC"));
    }

    #[test]
    fn test_no_standard_output() {
        let tx = Transaction {
            txid: "ab".repeat(32),
            inputs: vec![],
            outputs: vec![op_return_output(), output(None)],
        };
        assert_eq!(first_standard_output(&tx), None);
    }

    #[test]
    fn test_multi_receiver_order_and_shortfall() {
        let tx = Transaction {
            txid: "ab".repeat(32),
            inputs: vec![],
            outputs: vec![
                output(Some("addrB")),
                op_return_output(),
                output(Some("addrC")),
                output(Some("addrD")),
            ],
        };
        assert_eq!(
            standard_output_receivers(&tx, 3).unwrap(),
            vec!["addrB", "addrC", "addrD"]
        );
        assert!(standard_output_receivers(&tx, 4).is_none());
    }

    #[test]
    fn test_resolve_sender_first_resolvable_input() {
        let tx = Transaction {
            txid: "ab".repeat(32),
            inputs: vec![input(None), input(Some("addrA")), input(Some("addrZ"))],
            outputs: vec![],
        };
        assert_eq!(resolve_sender(&tx), Some("addrA"));
    }

    #[test]
    fn test_resolve_sender_none() {
        let tx = Transaction {
            txid: "ab".repeat(32),
            inputs: vec![input(None)],
            outputs: vec![],
        };
        assert_eq!(resolve_sender(&tx), None);
    }
}
