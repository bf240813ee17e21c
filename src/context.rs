use std::collections::HashMap;

/// Information about the change that triggered an action.
///
/// The keys are passed to the command as environment variables, prefixed with `REPOSMON_`.
pub type Context = HashMap<String, String>;
