//! Command-line arguments

use clap::{Parser, Subcommand};
use oidc_client::constants::{RESPONSE_TYPE_CODE, RESPONSE_TYPE_TOKEN};

#[derive(Parser, Debug)]
#[command(author, version, about = "OpenID Connect client with a persisted token")]
pub struct Args {
    /// Path to the TOML config file (falls back to CONFIG_PATH, then oidc-cli.toml)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Log in with the password grant, or client credentials without a username
    Login {
        #[arg(long, requires = "password")]
        username: Option<String>,
        #[arg(long, requires = "username")]
        password: Option<String>,
    },
    /// Print the authorization URL to open in a browser
    AuthorizeUrl {
        /// Falls back to the configured redirect_uri
        #[arg(long)]
        redirect_uri: Option<String>,
        #[arg(
            long,
            default_value = RESPONSE_TYPE_CODE,
            value_parser = [RESPONSE_TYPE_CODE, RESPONSE_TYPE_TOKEN]
        )]
        response_type: String,
        /// Defaults to a random UUID
        #[arg(long)]
        state: Option<String>,
    },
    /// Handle the URL the identity provider redirected back to
    Callback { url: String },
    /// End the session, printing the end session URL when there is one
    Logout {
        #[arg(long)]
        redirect: Option<String>,
    },
    /// Show the current token status as JSON
    Status,
    /// Fetch the user profile
    #[command(name = "userinfo")]
    UserInfo,
    /// Ask the introspection endpoint about the access token
    Introspect,
    /// GET a URL with the current token attached
    Get { url: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use clap::error::ErrorKind;

    fn parse(args: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("oidc-cli").chain(args.iter().copied()))
    }

    #[test]
    fn command_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn login_without_credentials_is_client_credentials() {
        let args = parse(&["login"]).unwrap();
        assert_eq!(
            args.command,
            Command::Login {
                username: None,
                password: None
            }
        );
        assert_eq!(args.config, None);
    }

    #[test]
    fn login_with_credentials() {
        let args = parse(&["login", "--username", "jane", "--password", "pw"]).unwrap();
        assert_eq!(
            args.command,
            Command::Login {
                username: Some("jane".into()),
                password: Some("pw".into())
            }
        );
    }

    #[test]
    fn login_username_without_password_rejected() {
        let err = parse(&["login", "--username", "jane"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn config_flag_accepted_before_and_after_command() {
        let before = parse(&["--config", "/etc/oidc.toml", "status"]).unwrap();
        let after = parse(&["status", "--config", "/etc/oidc.toml"]).unwrap();
        assert_eq!(before.config.as_deref(), Some("/etc/oidc.toml"));
        assert_eq!(after.config.as_deref(), Some("/etc/oidc.toml"));
        assert_eq!(before.command, Command::Status);
        assert_eq!(after.command, Command::Status);
    }

    #[test]
    fn authorize_url_defaults_to_code() {
        let args = parse(&["authorize-url", "--state", "xyz"]).unwrap();
        assert_eq!(
            args.command,
            Command::AuthorizeUrl {
                redirect_uri: None,
                response_type: "code".into(),
                state: Some("xyz".into())
            }
        );
    }

    #[test]
    fn authorize_url_rejects_unknown_response_type() {
        let args = parse(&["authorize-url", "--response-type", "token"]).unwrap();
        assert!(matches!(
            args.command,
            Command::AuthorizeUrl { ref response_type, .. } if response_type == "token"
        ));
        let err = parse(&["authorize-url", "--response-type", "id_token"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidValue);
    }

    #[test]
    fn callback_requires_url() {
        let err = parse(&["callback"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);

        let args = parse(&["callback", "http://app/cb?code=1&state=a="]).unwrap();
        assert_eq!(
            args.command,
            Command::Callback {
                url: "http://app/cb?code=1&state=a=".into()
            }
        );
    }

    #[test]
    fn logout_redirect_flag() {
        let args = parse(&["logout", "--redirect", "http://app/bye"]).unwrap();
        assert_eq!(
            args.command,
            Command::Logout {
                redirect: Some("http://app/bye".into())
            }
        );
    }

    #[test]
    fn userinfo_keeps_its_single_word_name() {
        assert_eq!(parse(&["userinfo"]).unwrap().command, Command::UserInfo);
    }

    #[test]
    fn unknown_command_and_trailing_args_rejected() {
        assert_eq!(
            parse(&["frobnicate"]).unwrap_err().kind(),
            ErrorKind::InvalidSubcommand
        );
        assert!(parse(&["status", "extra"]).is_err());
        assert!(parse(&["--config"]).is_err());
        assert!(parse(&[]).is_err());
    }
}
