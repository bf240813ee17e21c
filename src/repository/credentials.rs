// The order of the credential sources follows cargo's git authentication:
// https://github.com/rust-lang/cargo/blob/master/src/cargo/sources/git/utils.rs

use dirs::home_dir;
use git2::{Config, Cred, CredentialType, Error};
use std::path::PathBuf;

const SSH_KEYS: [&str; 6] = [
    ".ssh/id_dsa",
    ".ssh/id_ecdsa",
    ".ssh/id_ecdsa_sk",
    ".ssh/id_ed25519",
    ".ssh/id_ed25519_sk",
    ".ssh/id_rsa",
];

/// Offers the credentials already configured in the environment, one at a time.
///
/// libgit2 calls the credential callback again after every rejected attempt,
/// so each source is offered only once: the ssh-agent, the private keys in
/// `~/.ssh` (without passphrase), the git credential helper and at last the
/// default credentials. When everything is used up, the callback fails and
/// the fetch errors out instead of looping forever.
pub struct CredentialHandler {
    config: Option<Config>,
    username_offered: bool,
    agent_offered: bool,
    ssh_keys: Vec<PathBuf>,
    helper_offered: bool,
    default_offered: bool,
}

impl CredentialHandler {
    pub fn new(config: Option<Config>) -> Self {
        let home = home_dir().unwrap_or(PathBuf::from("~"));
        // Reversed, so popping returns them in the order above
        let ssh_keys = SSH_KEYS
            .iter()
            .rev()
            .map(|key| home.join(key))
            .filter(|key| key.exists())
            .collect();

        CredentialHandler {
            config,
            username_offered: false,
            agent_offered: false,
            ssh_keys,
            helper_offered: false,
            default_offered: false,
        }
    }

    pub fn next_credential(
        &mut self,
        url: &str,
        username: Option<&str>,
        allowed: CredentialType,
    ) -> Result<Cred, Error> {
        // libgit2 asks for a username first, if the url doesn't contain one
        if allowed.contains(CredentialType::USERNAME) {
            if self.username_offered {
                return Err(Error::from_str("no more usernames to try"));
            }
            self.username_offered = true;
            return Cred::username(username.unwrap_or("git"));
        }

        if allowed.contains(CredentialType::SSH_KEY) {
            let username = username.unwrap_or("git");
            if !self.agent_offered {
                self.agent_offered = true;
                return Cred::ssh_key_from_agent(username);
            }
            if let Some(key) = self.ssh_keys.pop() {
                return Cred::ssh_key(username, None, &key, None);
            }
        }

        if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) && !self.helper_offered {
            self.helper_offered = true;
            if let Some(config) = &self.config {
                return Cred::credential_helper(config, url, username);
            }
        }

        if allowed.contains(CredentialType::DEFAULT) && !self.default_offered {
            self.default_offered = true;
            return Cred::default();
        }

        Err(Error::from_str("no valid authentication available"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_should_offer_the_default_credentials_only_once() {
        let mut handler = CredentialHandler::new(None);

        let first = handler.next_credential("https://example.com", None, CredentialType::DEFAULT);
        assert!(first.is_ok());

        let second = handler.next_credential("https://example.com", None, CredentialType::DEFAULT);
        assert!(second.is_err());
    }

    #[test]
    fn it_should_offer_the_username_only_once() {
        let mut handler = CredentialHandler::new(None);

        let first = handler.next_credential("ssh://host/repo.git", None, CredentialType::USERNAME);
        assert!(first.is_ok());

        let second = handler.next_credential("ssh://host/repo.git", None, CredentialType::USERNAME);
        assert!(second.is_err());
    }

    #[test]
    fn it_should_fail_without_a_credential_helper() {
        let mut handler = CredentialHandler::new(None);

        let result = handler.next_credential(
            "https://example.com",
            Some("user"),
            CredentialType::USER_PASS_PLAINTEXT,
        );
        assert!(result.is_err());
    }
}
