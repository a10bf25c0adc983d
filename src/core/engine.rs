// Seam between session containers and the command engine they drive.
use crate::core::channel::TextChannel;
use crate::core::error::Error;
use crate::core::value::{Namespace, Value};

/// Synchronous command engine bound to one input and one output channel.
///
/// `run` consumes every pending line of `input` before returning. Errors stop
/// the run; effects of lines executed before the failure are kept.
pub trait Engine: Send {
    fn run(&mut self, input: &mut TextChannel, output: &mut TextChannel) -> Result<(), Error>;

    /// Value computed by the most recent command.
    fn return_value(&self) -> &Value;

    /// Global variable namespace.
    fn namespace(&self) -> &Namespace;

    fn set_namespace(&mut self, namespace: Namespace);
}

/// Builds fresh engines for new sessions.
pub trait EngineFactory: Send + Sync {
    fn create(&self) -> Box<dyn Engine>;
}

impl<F> EngineFactory for F
where
    F: Fn() -> Box<dyn Engine> + Send + Sync,
{
    fn create(&self) -> Box<dyn Engine> {
        self()
    }
}
