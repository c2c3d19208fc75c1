//! Participants
//!
//! One side of a match: where it lives on the network, which role token it
//! holds, and the mailbox it reads from when traffic has to be relayed.
//!
//! Queue record format: `address/prefix,token,mailbox`.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use ipnet::Ipv4Net;
use rand::Rng;
use thiserror::Error;

/// Mailbox suffixes are drawn below this bound.
pub const MAILBOX_SUFFIX_BOUND: u32 = 100_000;

/// Participant parsing errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParticipantError {
    /// Record does not have three comma-separated fields.
    #[error("malformed participant record: {0:?}")]
    MalformedRecord(String),
    /// Address field is not `a.b.c.d/prefix`.
    #[error("malformed address: {0:?}")]
    MalformedAddress(String),
    /// Role token is neither 0 nor 1.
    #[error("invalid role token: {0:?}")]
    InvalidToken(String),
    /// Mailbox name is empty or contains separators.
    #[error("invalid mailbox name: {0:?}")]
    InvalidMailbox(String),
}

/// Role token. The two sides of a match always hold opposite tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Side {
    /// Token 0.
    A,
    /// Token 1.
    B,
}

impl Side {
    /// Wire token.
    pub const fn token(self) -> u8 {
        match self {
            Side::A => 0,
            Side::B => 1,
        }
    }

    /// Side for a wire token.
    pub fn from_token(token: u8) -> Option<Self> {
        match token {
            0 => Some(Side::A),
            1 => Some(Side::B),
            _ => None,
        }
    }

    /// The complementary token.
    pub const fn opposite(self) -> Self {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }

    /// Coin flip.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        if rng.gen_bool(0.5) {
            Side::A
        } else {
            Side::B
        }
    }
}

/// One side of a match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Participant {
    interface: Ipv4Net,
    side: Side,
    mailbox: String,
}

impl Participant {
    /// New participant with a freshly generated mailbox name.
    pub fn new<R: Rng + ?Sized>(interface: Ipv4Net, side: Side, rng: &mut R) -> Self {
        let mailbox = mailbox_name(interface.addr(), rng.gen_range(0..MAILBOX_SUFFIX_BOUND));
        Self {
            interface,
            side,
            mailbox,
        }
    }

    /// New participant with a random token.
    pub fn with_random_side<R: Rng + ?Sized>(interface: Ipv4Net, rng: &mut R) -> Self {
        let side = Side::random(rng);
        Self::new(interface, side, rng)
    }

    /// New participant whose token is derived from `opponent`'s.
    pub fn opposing<R: Rng + ?Sized>(interface: Ipv4Net, opponent: &Participant, rng: &mut R) -> Self {
        Self::new(interface, opponent.side.opposite(), rng)
    }

    /// Build from explicit parts.
    pub fn from_parts(
        interface: Ipv4Net,
        side: Side,
        mailbox: impl Into<String>,
    ) -> Result<Self, ParticipantError> {
        let mailbox = mailbox.into();
        validate_mailbox(&mailbox)?;
        Ok(Self {
            interface,
            side,
            mailbox,
        })
    }

    /// Host address.
    pub fn address(&self) -> Ipv4Addr {
        self.interface.addr()
    }

    /// Address prefix length.
    pub fn prefix_len(&self) -> u8 {
        self.interface.prefix_len()
    }

    /// Address and prefix together.
    pub fn interface(&self) -> Ipv4Net {
        self.interface
    }

    /// Role token.
    pub fn side(&self) -> Side {
        self.side
    }

    /// Name of the mailbox this participant reads from.
    pub fn mailbox(&self) -> &str {
        &self.mailbox
    }

    /// Queue record, without a trailing newline.
    pub fn to_record(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{},{},{}",
            self.interface.addr(),
            self.interface.prefix_len(),
            self.side.token(),
            self.mailbox
        )
    }
}

impl FromStr for Participant {
    type Err = ParticipantError;

    fn from_str(record: &str) -> Result<Self, Self::Err> {
        let record = record.trim();
        let fields: Vec<&str> = record.split(',').collect();
        let [address, token, mailbox] = fields.as_slice() else {
            return Err(ParticipantError::MalformedRecord(record.to_string()));
        };

        let interface = parse_interface(address)?;
        let side = token
            .parse::<u8>()
            .ok()
            .and_then(Side::from_token)
            .ok_or_else(|| ParticipantError::InvalidToken(token.to_string()))?;

        Self::from_parts(interface, side, *mailbox)
    }
}

/// Parse `a.b.c.d/prefix`, keeping the host bits.
pub fn parse_interface(text: &str) -> Result<Ipv4Net, ParticipantError> {
    text.trim()
        .parse::<Ipv4Net>()
        .map_err(|_| ParticipantError::MalformedAddress(text.to_string()))
}

fn mailbox_name(address: Ipv4Addr, suffix: u32) -> String {
    format!("{}-{}.txt", address.to_string().replace('.', "-"), suffix)
}

fn validate_mailbox(mailbox: &str) -> Result<(), ParticipantError> {
    let forbidden = |c: char| c == ',' || c == '/' || c == ':' || c.is_whitespace();
    if mailbox.is_empty() || mailbox.contains(forbidden) {
        return Err(ParticipantError::InvalidMailbox(mailbox.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn net(s: &str) -> Ipv4Net {
        s.parse().unwrap()
    }

    #[test]
    fn test_record_roundtrip() {
        let record = "192.168.1.20/24,1,192-168-1-20-4711.txt";
        let participant: Participant = record.parse().unwrap();

        assert_eq!(participant.address(), Ipv4Addr::new(192, 168, 1, 20));
        assert_eq!(participant.prefix_len(), 24);
        assert_eq!(participant.side(), Side::B);
        assert_eq!(participant.mailbox(), "192-168-1-20-4711.txt");
        assert_eq!(participant.to_record(), record);
    }

    #[test]
    fn test_mailbox_name_format() {
        let mut rng = StdRng::seed_from_u64(7);
        let p = Participant::new(net("10.0.0.7/8"), Side::A, &mut rng);

        let name = p.mailbox();
        assert!(name.starts_with("10-0-0-7-"));
        assert!(name.ends_with(".txt"));
        let suffix: u32 = name["10-0-0-7-".len()..name.len() - 4].parse().unwrap();
        assert!(suffix < MAILBOX_SUFFIX_BOUND);
    }

    #[test]
    fn test_opposing_derives_complementary_token() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..16 {
            let first = Participant::with_random_side(net("10.0.0.1/24"), &mut rng);
            let second = Participant::opposing(net("10.0.0.2/24"), &first, &mut rng);
            assert_ne!(first.side(), second.side());
        }
    }

    #[test]
    fn test_side_tokens() {
        assert_eq!(Side::A.token(), 0);
        assert_eq!(Side::B.token(), 1);
        assert_eq!(Side::from_token(1), Some(Side::B));
        assert_eq!(Side::from_token(2), None);
        assert_eq!(Side::A.opposite().opposite(), Side::A);
    }

    #[test]
    fn test_malformed_records() {
        assert!(matches!(
            "10.0.0.1/24,0".parse::<Participant>(),
            Err(ParticipantError::MalformedRecord(_))
        ));
        assert!(matches!(
            "10.0.0.1,0,box.txt".parse::<Participant>(),
            Err(ParticipantError::MalformedAddress(_))
        ));
        assert!(matches!(
            "10.0.0.1/33,0,box.txt".parse::<Participant>(),
            Err(ParticipantError::MalformedAddress(_))
        ));
        assert!(matches!(
            "10.0.0.1/24,2,box.txt".parse::<Participant>(),
            Err(ParticipantError::InvalidToken(_))
        ));
        assert!(matches!(
            "10.0.0.1/24,0,".parse::<Participant>(),
            Err(ParticipantError::InvalidMailbox(_))
        ));
    }

    #[test]
    fn test_equality_is_record_equality() {
        let a: Participant = "10.0.0.1/24,0,a.txt".parse().unwrap();
        let b: Participant = "10.0.0.1/24,0,a.txt".parse().unwrap();
        let c: Participant = "10.0.0.1/24,0,b.txt".parse().unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
