// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::io::Cursor;

use rstest::rstest;

use super::{Authenticator, PromptLogin, StaticToken, parse_login_response, requested_scopes};
use crate::Error;
use crate::config::Auth;

const REDIRECT: &str = "https://www.facebook.com/connect/login_success.html";

fn prompt() -> PromptLogin {
    PromptLogin::new(Auth {
        open_browser: false,
        ..Default::default()
    })
}

#[rstest]
fn test_requested_scopes() {
    let scopes = requested_scopes(
        &["status".into(), "photos".into()],
        &["publish_actions".into()],
    );
    assert_eq!(
        scopes,
        vec![
            "user_status",
            "friends_status",
            "user_photos",
            "friends_photos",
            "publish_actions"
        ]
    );
}

#[rstest]
#[case::token(
    "https://www.facebook.com/connect/login_success.html#access_token=abc&expires_in=3600",
    Some("abc")
)]
#[case::surrounding_whitespace(
    "  https://www.facebook.com/connect/login_success.html#access_token=abc\n",
    Some("abc")
)]
#[case::refused(
    "https://www.facebook.com/connect/login_success.html?error=access_denied#_=_",
    None
)]
#[case::no_fragment("https://www.facebook.com/connect/login_success.html", None)]
#[case::empty_token(
    "https://www.facebook.com/connect/login_success.html#access_token=",
    None
)]
#[case::wrong_page("https://www.facebook.com/other.html#access_token=abc", None)]
#[case::wrong_host("https://evil.example.com/connect/login_success.html#access_token=abc", None)]
#[case::not_an_address("abc", None)]
fn test_parse_login_response(#[case] response: &str, #[case] expected: Option<&str>) {
    assert_eq!(
        parse_login_response(response, REDIRECT).as_deref(),
        expected
    );
}

#[rstest]
fn test_dialog_url_lists_scopes() {
    let url = prompt()
        .dialog_url(&["user_status".into(), "friends_status".into()])
        .unwrap();
    let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    assert!(pairs.contains(&("response_type".into(), "token".into())));
    assert!(pairs.contains(&("scope".into(), "user_status,friends_status".into())));
    assert!(pairs.contains(&("redirect_uri".into(), REDIRECT.into())));
}

#[rstest]
fn test_prompt_login_reads_token() {
    let auth = prompt();
    assert!(!auth.is_logged_in());
    let mut input = Cursor::new(format!("{REDIRECT}#access_token=tok123&expires_in=0\n"));
    auth.login_with(&["user_status".into()], &mut input).unwrap();
    assert_eq!(auth.access_token().as_deref(), Some("tok123"));

    auth.logout();
    assert!(!auth.is_logged_in());
}

#[rstest]
fn test_prompt_login_rejects_bad_response() {
    let auth = prompt();
    let mut input = Cursor::new("no thanks\n");
    let err = auth.login_with(&[], &mut input).unwrap_err();
    assert!(matches!(err, Error::LoginFailed), "got {err:?}");
    assert!(!auth.is_logged_in());
}

#[rstest]
fn test_static_token() {
    let auth = StaticToken::new("abc");
    assert!(auth.is_logged_in());
    auth.login(&[]).unwrap();
    auth.logout();
    assert_eq!(auth.access_token(), None);
}
