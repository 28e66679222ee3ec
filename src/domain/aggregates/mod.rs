//! Aggregates module
pub mod product;
pub mod coupon;
pub mod order;
pub mod cart;

pub use product::{Product, ProductError, ProductStatus, RestockTarget, SizeStock, Variant, VariantKey};
pub use coupon::{Coupon, CouponContext, CouponError, CouponRejection, CouponScope, CouponStatus, DiscountQuote, DiscountType, NewCoupon};
pub use order::{Address, ItemRequest, NewOrder, Order, OrderError, OrderItem, OrderStatus, OrderTotals, PaymentMethod, PaymentStatus, RequestKind, RequestStatus, Shipment};
pub use cart::{Cart, CartError, CartItem, Wishlist};
