pub mod replay;

// Keeps the match over `Action` out of this file.
mod run;

#[derive(Debug)]
pub enum Action {
    Replay(replay::Args),
}

impl Action {
    /// Execute the action.
    /// # Errors
    /// Returns an error if the action fails.
    pub fn execute(self) -> anyhow::Result<()> {
        run::execute(self)
    }
}
