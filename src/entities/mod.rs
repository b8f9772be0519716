pub mod commerce;
pub mod email_log;
pub mod email_template;
pub mod order;
pub mod order_item;
pub mod payment;
pub mod return_request;
pub mod search_query;
pub mod shipment;
pub mod shipping_rate;
pub mod stock_reservation;
