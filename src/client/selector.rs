//! Choosing which live server receives the next submission.

use rand::Rng;

use crate::transport::ServerAddr;

/// Picks one of the currently live servers.
///
/// `servers` is never empty. The returned index must be in bounds; out of
/// range values are clamped by the caller.
pub trait ServerSelector: Send {
    fn select(&mut self, servers: &[&ServerAddr]) -> usize;
}

/// Uniformly random choice.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSelector;

impl ServerSelector for RandomSelector {
    fn select(&mut self, servers: &[&ServerAddr]) -> usize {
        rand::thread_rng().gen_range(0..servers.len())
    }
}

/// Cycles through servers in order.
#[derive(Debug, Default, Clone)]
pub struct RoundRobinSelector {
    next: usize,
}

impl ServerSelector for RoundRobinSelector {
    fn select(&mut self, servers: &[&ServerAddr]) -> usize {
        let index = self.next % servers.len();
        self.next = index + 1;
        index
    }
}
