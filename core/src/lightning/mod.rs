//! Lightning network session.
//!
//! A [`LightningSession`] drives a payment-channel node client behind the same
//! session contract as the RPC backed sessions: one synthetic subaccount, a
//! balance, a merged payment history and node events routed as domain events.

mod history;
mod input;
mod session;

pub use history::{
    HistorySources, Payment, PaymentStatus, PaymentType, ReverseSwapInfo, ReverseSwapStatus,
    SwapInfo, SwapStatus, merge_history,
};
pub use input::{
    LightningInput, LnInvoice, LnUrlAuthRequest, LnUrlPayOutcome, LnUrlPayRequest,
    LnUrlWithdrawRequest, SendLimits, check_amount,
};
pub use session::{
    InputValidation, LightningSession, LightningState, LightningTransaction, SendOutcome,
};
