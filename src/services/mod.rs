pub mod admin_service;
pub mod coupon_service;
pub mod order_service;
pub mod order_state;
pub mod reconciler;
pub mod stock_ledger;
