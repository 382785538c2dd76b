//! Routing data hidden in the local-part of envelope addresses.
//!
//! ```text
//! recipient: <user-token>(option)*@domain
//!   option:  >device[,device...]   #priority (-2..2)
//!            @retry-seconds        $expire-seconds
//!            !sound
//! sender:    <app-token>@domain    (multi-token mode only)
//! ```
//!
//! Parsing is lenient on purpose: a recipient only needs its leading token,
//! every option that does not parse is simply left unset.

use nom::{
    bytes::complete::take_while1,
    character::complete::{char, digit1, one_of, satisfy},
    combinator::{opt, recognize},
    multi::separated_list1,
    sequence::{pair, preceded},
    IResult,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    pub app_token: Option<String>,
    pub address: String,
    pub show_address: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recipient {
    pub user_token: String,
    pub device: Option<String>,
    pub priority: Option<i8>,
    pub retry_sec: Option<u32>,
    pub expire_sec: Option<u32>,
    pub sound: Option<String>,
}

/// Where the application token of a message comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderMode {
    /// Every message is sent with this application token.
    Single(String),
    /// The application token is the local-part of the sender address.
    Multi,
}

fn is_word(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_token(c: char) -> bool {
    is_word(c) || c == '-'
}

fn token(input: &str) -> IResult<&str, &str> {
    take_while1(is_token)(input)
}

fn devices(input: &str) -> IResult<&str, &str> {
    preceded(
        char('>'),
        recognize(separated_list1(char(','), take_while1(is_word))),
    )(input)
}

fn priority(input: &str) -> IResult<&str, &str> {
    preceded(
        char('#'),
        recognize(pair(opt(one_of("+-")), satisfy(|c| c.is_ascii_digit()))),
    )(input)
}

fn retry(input: &str) -> IResult<&str, &str> {
    preceded(char('@'), digit1)(input)
}

fn expire(input: &str) -> IResult<&str, &str> {
    preceded(char('$'), digit1)(input)
}

fn sound(input: &str) -> IResult<&str, &str> {
    preceded(char('!'), take_while1(is_word))(input)
}

/// Only the first occurrence of a delimiter counts, if what follows it
/// is malformed the option is absent.
fn suffix<'a>(
    options: &'a str,
    delimiter: char,
    parser: fn(&'a str) -> IResult<&'a str, &'a str>,
) -> Option<&'a str> {
    let at = options.find(delimiter)?;
    parser(&options[at..]).ok().map(|(_, value)| value)
}

/// The domain starts after the last `@`, the local-part may contain
/// others for the retry option. SMTP quoting is removed.
fn local_part(address: &str) -> &str {
    let local = match address.rsplit_once('@') {
        Some((local, _domain)) => local,
        None => address,
    };
    local
        .strip_prefix('"')
        .and_then(|l| l.strip_suffix('"'))
        .unwrap_or(local)
}

impl Recipient {
    pub fn parse(address: &str) -> Option<Self> {
        let (options, user_token) = token(local_part(address)).ok()?;

        Some(Self {
            user_token: user_token.to_string(),
            device: suffix(options, '>', devices).map(str::to_string),
            priority: suffix(options, '#', priority)
                .and_then(|p| p.parse::<i8>().ok())
                .filter(|p| (-2..=2).contains(p)),
            retry_sec: suffix(options, '@', retry).and_then(|r| r.parse().ok()),
            expire_sec: suffix(options, '$', expire).and_then(|e| e.parse().ok()),
            sound: suffix(options, '!', sound).map(str::to_string),
        })
    }
}

impl Sender {
    pub fn parse(address: &str, mode: &SenderMode) -> Option<Self> {
        match mode {
            SenderMode::Single(app_token) => Some(Self {
                app_token: Some(app_token.clone()),
                address: address.to_string(),
                show_address: true,
            }),
            SenderMode::Multi => {
                let (_, app_token) = token(local_part(address)).ok()?;
                Some(Self {
                    app_token: Some(app_token.to_string()),
                    address: address.to_string(),
                    show_address: false,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_and_sound() {
        let r = Recipient::parse("account-token#-1!incoming@domain").unwrap();
        assert_eq!(
            r,
            Recipient {
                user_token: "account-token".into(),
                priority: Some(-1),
                sound: Some("incoming".into()),
                ..Default::default()
            }
        );
    }

    #[test]
    fn device_list_is_kept_joined() {
        let r = Recipient::parse("account-token>phone,tablet@domain").unwrap();
        assert_eq!(r.user_token, "account-token");
        assert_eq!(r.device.as_deref(), Some("phone,tablet"));
        assert_eq!(r.priority, None);
    }

    #[test]
    fn every_option_in_any_order() {
        let r = Recipient::parse("uQiRzpo4DXghDmr9QzzfQu27cmVRsG$3600!siren#2>phone@30@api.pushover.net")
            .unwrap();
        assert_eq!(
            r,
            Recipient {
                user_token: "uQiRzpo4DXghDmr9QzzfQu27cmVRsG".into(),
                device: Some("phone".into()),
                priority: Some(2),
                retry_sec: Some(30),
                expire_sec: Some(3600),
                sound: Some("siren".into()),
            }
        );
    }

    #[test]
    fn only_first_delimiter_counts() {
        let r = Recipient::parse("tok!bike!pushover#1#-2@host").unwrap();
        assert_eq!(r.sound.as_deref(), Some("bike"));
        assert_eq!(r.priority, Some(1));

        // the first '#' is malformed, the second one is not looked at
        let r = Recipient::parse("tok#x#1@host").unwrap();
        assert_eq!(r.priority, None);
    }

    #[test]
    fn malformed_options_are_absent() {
        let r = Recipient::parse("tok#9$soon@host").unwrap();
        assert_eq!(r.user_token, "tok");
        assert_eq!(r.priority, None);
        assert_eq!(r.expire_sec, None);

        let r = Recipient::parse("tok@99999999999@host").unwrap();
        assert_eq!(r.retry_sec, None);
    }

    #[test]
    fn trailing_garbage_is_tolerated() {
        let r = Recipient::parse("tok.whatever!bike@host").unwrap();
        assert_eq!(r.user_token, "tok");
        assert_eq!(r.sound.as_deref(), Some("bike"));
    }

    #[test]
    fn quoted_local_part() {
        let r = Recipient::parse("\"tok>phone@60\"@host").unwrap();
        assert_eq!(r.device.as_deref(), Some("phone"));
        assert_eq!(r.retry_sec, Some(60));
    }

    #[test]
    fn no_token_no_recipient() {
        assert_eq!(Recipient::parse("#1!bike@host"), None);
        assert_eq!(Recipient::parse("@host"), None);
        assert_eq!(Recipient::parse(""), None);
    }

    #[test]
    fn sender_modes() {
        let single = SenderMode::Single("azGDORePK8gMaC0QOYAMyEEuzJnyUi".into());
        let s = Sender::parse("lance@bikeleague.org", &single).unwrap();
        assert_eq!(s.app_token.as_deref(), Some("azGDORePK8gMaC0QOYAMyEEuzJnyUi"));
        assert_eq!(s.address, "lance@bikeleague.org");
        assert!(s.show_address);

        let s = Sender::parse("azGDORePK8gMaC0QOYAMyEEuzJnyUi@api.pushover.net", &SenderMode::Multi)
            .unwrap();
        assert_eq!(s.app_token.as_deref(), Some("azGDORePK8gMaC0QOYAMyEEuzJnyUi"));
        assert!(!s.show_address);

        assert_eq!(Sender::parse("", &SenderMode::Multi), None);
    }
}
