use crate::{
    db::OrmConn, middleware::client_ip::ForwardedPolicy, rate_limit::RedemptionLimiter, services::reconciler::ReconcilerConfig,
    services::stock_ledger::StockLedger,
};

#[derive(Clone)]
pub struct AppState {
    pub orm: OrmConn,
    pub ledger: StockLedger,
    pub limiter: RedemptionLimiter,
    pub reconciler: ReconcilerConfig,
    pub forwarded: ForwardedPolicy,
}
