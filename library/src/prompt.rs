/// Questions the updater needs a human to answer.
#[cfg_attr(test, mockall::automock)]
pub trait Prompt {
    /// Asks a yes/no question.
    fn confirm(&self, message: &str) -> bool;

    /// Asks the user to pick one of `options`. `None` means no valid choice
    /// was made.
    fn choose<'a>(&self, message: &str, options: &[&'a str]) -> Option<usize>;
}

/// Answers yes to everything, for unattended runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct AssumeYes;

impl Prompt for AssumeYes {
    fn confirm(&self, message: &str) -> bool {
        tree_info!("{} [assuming yes]", message);
        true
    }

    fn choose(&self, message: &str, _options: &[&str]) -> Option<usize> {
        tree_warn!("{} [no answer in unattended mode]", message);
        None
    }
}
