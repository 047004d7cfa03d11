//! Pure matching of observed chain transactions to pending payments.

use std::collections::HashSet;

/// An incoming transfer as reported by the explorer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedTransaction {
    pub hash: String,
    pub success: bool,
    /// Transferred value in nanotons.
    pub value: i64,
    /// Decoded text comment of the incoming message.
    pub comment: Option<String>,
    pub source_address: Option<String>,
    /// Unix seconds.
    pub timestamp: i64,
}

/// What a pending payment expects to see on chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpectedTransfer<'a> {
    pub invoice_id: &'a str,
    /// Expected value in nanotons.
    pub amount: i64,
}

/// Whether `transaction` settles `expected`.
///
/// All of: the transaction succeeded, it carries a comment, the comment is
/// the invoice reference (ignoring case), and at least the expected amount
/// arrived. Underpayment never matches; overpayment does.
pub fn transaction_matches(transaction: &ObservedTransaction, expected: ExpectedTransfer<'_>) -> bool {
    if !transaction.success {
        return false;
    }
    let Some(comment) = transaction.comment.as_deref() else {
        return false;
    };
    comment.to_lowercase() == expected.invoice_id.to_lowercase() && transaction.value >= expected.amount
}

/// First transaction matching `expected` whose hash is not in `consumed`.
pub fn find_match<'t>(
    expected: ExpectedTransfer<'_>,
    transactions: &'t [ObservedTransaction],
    consumed: &HashSet<String>,
) -> Option<&'t ObservedTransaction> {
    transactions
        .iter()
        .filter(|t| !consumed.contains(&t.hash))
        .find(|t| transaction_matches(t, expected))
}
