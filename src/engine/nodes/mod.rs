pub mod ai;
pub mod condition;
pub mod delay;
pub mod dispatch;
pub mod email;
pub mod google;
pub mod http;
pub mod messaging;
mod outbound;
pub mod passthrough;
pub mod transform;
pub mod trigger;
pub mod zoom;

#[cfg(test)]
pub(crate) mod test_support;
