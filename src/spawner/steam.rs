use std::path::Path;

use crate::models::{Credentials, Job};
use crate::spawner::ToolCommand;

const REDACTED: &str = "********";

/// Argument vector for a single workshop item download.
pub fn build_args(
    app_id: &str,
    content_item_id: &str,
    credentials: Option<&Credentials>,
) -> Vec<String> {
    let mut args = vec!["+login".to_string()];
    match credentials.filter(|c| c.is_complete()) {
        Some(creds) => {
            args.push(creds.username.clone());
            args.push(creds.password.clone());
        }
        None => args.push("anonymous".to_string()),
    }
    args.push("+workshop_download_item".to_string());
    args.push(app_id.to_string());
    args.push(content_item_id.to_string());
    args.push("+quit".to_string());
    args
}

/// Copy of `args` that is safe to log.
pub fn redact_args(args: &[String]) -> Vec<String> {
    let mut out = args.to_vec();
    let mut i = 0;
    while i < out.len() {
        if out[i] == "+login" && i + 2 < out.len() && out[i + 1] != "anonymous" {
            out[i + 2] = REDACTED.to_string();
            i += 3;
        } else {
            i += 1;
        }
    }
    out
}

pub fn command_for_job(job: &Job) -> ToolCommand {
    ToolCommand {
        program: job.tool_path.clone(),
        args: build_args(&job.app_id, &job.content_item_id, job.credentials.as_ref()),
        working_dir: job.working_dir.clone(),
        env: Vec::new(),
    }
}

/// Directory the tool writes an item into, below its content root.
pub fn download_dir(
    content_root: &Path,
    app_id: &str,
    content_item_id: &str,
) -> std::path::PathBuf {
    content_root
        .join("steamapps")
        .join("workshop")
        .join("content")
        .join(app_id)
        .join(content_item_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn creds(user: &str, pass: &str) -> Credentials {
        Credentials {
            username: user.to_string(),
            password: pass.to_string(),
        }
    }

    #[test]
    fn test_anonymous_login_without_credentials() {
        let args = build_args("294100", "100", None);
        assert_eq!(
            args,
            vec![
                "+login",
                "anonymous",
                "+workshop_download_item",
                "294100",
                "100",
                "+quit"
            ]
        );
    }

    #[test]
    fn test_authenticated_login() {
        let c = creds("alice", "s3cret");
        let args = build_args("294100", "100", Some(&c));
        assert_eq!(&args[..3], &["+login", "alice", "s3cret"]);
        assert_eq!(args.last().map(String::as_str), Some("+quit"));
    }

    #[test]
    fn test_partial_credentials_fall_back_to_anonymous() {
        let c = creds("alice", "");
        let args = build_args("294100", "100", Some(&c));
        assert_eq!(args[1], "anonymous");
    }

    #[test]
    fn test_redact_args_hides_password() {
        let c = creds("alice", "s3cret");
        let redacted = redact_args(&build_args("294100", "100", Some(&c)));
        assert_eq!(redacted[1], "alice");
        assert_eq!(redacted[2], REDACTED);
        assert!(!redacted.iter().any(|a| a == "s3cret"));
        assert_eq!(redacted[4], "294100");
    }

    #[test]
    fn test_redact_args_hides_password_starting_with_plus() {
        let c = creds("bob", "+hunter2");
        let redacted = redact_args(&build_args("294100", "100", Some(&c)));
        assert_eq!(&redacted[..3], &["+login", "bob", REDACTED]);
        assert!(!redacted.iter().any(|a| a == "+hunter2"));
        assert_eq!(redacted[3], "+workshop_download_item");
    }

    #[test]
    fn test_redact_args_leaves_anonymous_alone() {
        let args = build_args("294100", "100", None);
        assert_eq!(redact_args(&args), args);
    }

    #[test]
    fn test_download_dir_layout() {
        let dir = download_dir(Path::new("/opt/steamcmd"), "294100", "100");
        assert_eq!(
            dir,
            PathBuf::from("/opt/steamcmd/steamapps/workshop/content/294100/100")
        );
    }
}
