pub mod audit_logs;
pub mod coupons;
pub mod order_items;
pub mod orders;
pub mod product_sizes;
pub mod products;
pub mod sea_orm_active_enums;
pub mod stock_movements;

pub use audit_logs::Entity as AuditLogs;
pub use coupons::Entity as Coupons;
pub use order_items::Entity as OrderItems;
pub use orders::Entity as Orders;
pub use product_sizes::Entity as ProductSizes;
pub use products::Entity as Products;
pub use stock_movements::Entity as StockMovements;
