//! Domain layer: aggregates, value objects, events and the pure rules around them.
pub mod aggregates;
pub mod clock;
pub mod events;
pub mod pricing;
pub mod value_objects;
pub mod webhooks;
