//! russh-backed remote sessions.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hostpilot_model::Credential;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use tracing::debug;

use super::{RemoteConnector, RemoteError, RemoteSession};

/// Runs a command as another user by answering `su`'s password prompt.
///
/// Arguments: user, password, command.
const SU_WRAPPER: &str = r#"#!/usr/bin/expect -f
spawn -noecho su [lindex $argv 0] -c [lindex $argv 2]
set password [lindex $argv 1]
expect "*assword:"
send "$password\r"
set timeout 60
expect eof
exit
"#;

/// Host key policy for bootstrap connections.
///
/// Hosts are addressed by freshly provisioned IPs with no known_hosts
/// entries, so every key is accepted.
struct AcceptAnyHostKey;

#[async_trait]
impl client::Handler for AcceptAnyHostKey {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Password-authenticated SSH connector.
pub struct SshConnector {
    config: Arc<client::Config>,
    connect_timeout: Duration,
    wrapper_path: String,
}

impl SshConnector {
    /// `remote_tmp` is where the `su` wrapper script is written on targets.
    pub fn new(connect_timeout: Duration, remote_tmp: &str) -> Self {
        Self {
            config: Arc::new(client::Config::default()),
            connect_timeout,
            wrapper_path: format!("{}/hostpilot-su.exp", remote_tmp.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl RemoteConnector for SshConnector {
    async fn connect(
        &self,
        host: &str,
        port: u16,
        login: &Credential,
    ) -> Result<Box<dyn RemoteSession>, RemoteError> {
        let connect = client::connect(self.config.clone(), (host.to_string(), port), AcceptAnyHostKey);
        let mut handle = tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| RemoteError::Connect(format!("timed out connecting to {host}:{port}")))?
            .map_err(|e| RemoteError::Connect(e.to_string()))?;

        let authenticated = handle
            .authenticate_password(login.username.as_str(), login.password.as_str())
            .await
            .map_err(|e| RemoteError::Protocol(e.to_string()))?;
        if !authenticated {
            return Err(RemoteError::Auth(login.username.clone()));
        }

        debug!(host = %host, user = %login.username, "SSH session established");
        Ok(Box::new(SshSession {
            handle,
            wrapper_path: self.wrapper_path.clone(),
        }))
    }
}

struct SshSession {
    handle: Handle<AcceptAnyHostKey>,
    wrapper_path: String,
}

impl SshSession {
    /// Run `command`, optionally feeding `stdin`, and collect its output.
    async fn run(&mut self, command: &str, stdin: Option<&[u8]>) -> Result<String, RemoteError> {
        let protocol = |e: russh::Error| RemoteError::Protocol(e.to_string());

        let mut channel = self.handle.channel_open_session().await.map_err(protocol)?;
        channel.exec(true, command).await.map_err(protocol)?;
        if let Some(data) = stdin {
            channel.data(data).await.map_err(protocol)?;
            channel.eof().await.map_err(protocol)?;
        }

        let mut output = Vec::new();
        let mut exit_status = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } | ChannelMsg::ExtendedData { ref data, .. } => {
                    output.extend_from_slice(data);
                }
                ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
                _ => {}
            }
        }

        let output = String::from_utf8_lossy(&output).into_owned();
        match exit_status {
            Some(0) => Ok(output),
            status => Err(RemoteError::Exit { status, output }),
        }
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn upload(&mut self, local_path: &Path, remote_path: &str) -> Result<(), RemoteError> {
        let bytes = tokio::fs::read(local_path)
            .await
            .map_err(|source| RemoteError::LocalFile {
                path: local_path.to_path_buf(),
                source,
            })?;
        self.run(&format!("cat > {}", shell_quote(remote_path)), Some(&bytes))
            .await
            .map(|_| ())
    }

    async fn exec(
        &mut self,
        command: &str,
        run_as: Option<&Credential>,
    ) -> Result<String, RemoteError> {
        let Some(user) = run_as else {
            return self.run(command, None).await;
        };

        let wrapper = shell_quote(&self.wrapper_path);
        self.run(
            &format!("cat > {wrapper} && chmod 700 {wrapper}"),
            Some(SU_WRAPPER.as_bytes()),
        )
        .await?;
        self.run(&su_command(&wrapper, user, command), None).await
    }

    async fn close(&mut self) -> Result<(), RemoteError> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
            .map_err(|e| RemoteError::Protocol(e.to_string()))
    }
}

fn su_command(wrapper: &str, user: &Credential, command: &str) -> String {
    format!(
        "{wrapper} {} {} {}",
        shell_quote(&user.username),
        shell_quote(&user.password),
        shell_quote(command)
    )
}

/// Single-quote `s` for POSIX shells.
pub(super) fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/tmp/a b"), "'/tmp/a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_su_command_quotes_every_argument() {
        let user = Credential {
            username: "mysql".to_string(),
            password: "p'w".to_string(),
        };
        assert_eq!(
            su_command("'/tmp/hostpilot-su.exp'", &user, "sh /tmp/agent/agent.sh"),
            r"'/tmp/hostpilot-su.exp' 'mysql' 'p'\''w' 'sh /tmp/agent/agent.sh'"
        );
    }

    #[test]
    fn test_wrapper_path_follows_remote_tmp() {
        let connector = SshConnector::new(Duration::from_secs(10), "/var/tmp/");
        assert_eq!(connector.wrapper_path, "/var/tmp/hostpilot-su.exp");
    }
}
