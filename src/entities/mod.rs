pub mod magazine;
pub mod order;
pub mod order_item;

pub use magazine::Entity as Magazine;
pub use order::Entity as Order;
pub use order_item::Entity as OrderItem;
