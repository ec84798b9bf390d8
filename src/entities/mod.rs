pub mod address;
pub mod category;
pub mod order;
pub mod order_item;
pub mod payment;
pub mod product;
pub mod product_detail;
pub mod product_image;
pub mod product_review;
pub mod product_size;
pub mod recently_viewed;
pub mod webhook_event;
pub mod wishlist_item;
