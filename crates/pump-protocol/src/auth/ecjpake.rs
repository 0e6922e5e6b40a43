//! EC-JPAKE over P-256
//!
//! Two-round password-authenticated key exchange with Schnorr proofs of
//! knowledge hashed by SHA-256. The wire layout follows the TLS ECJPAKE
//! encoding: each point is a 1-byte length plus an uncompressed SEC1
//! point, each proof is `V ‖ r` with `r` as a 1-byte length plus a 32-byte
//! big-endian scalar.
//!
//! The group arithmetic comes from the `p256` crate; this module only
//! implements the protocol on top of it.

use p256::elliptic_curve::bigint::U256;
use p256::elliptic_curve::ops::Reduce;
use p256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use p256::elliptic_curve::{Field, PrimeField};
use p256::{AffinePoint, EncodedPoint, FieldBytes, ProjectivePoint, Scalar};
use sha2::{Digest, Sha256};

use crate::error::AuthError;

/// Encoded point length (1-byte length prefix + 65-byte point)
pub const POINT_LEN: usize = 66;
/// Encoded proof length (point + 1-byte length prefix + 32-byte scalar)
pub const ZKP_LEN: usize = POINT_LEN + 33;
/// One round-one half, or a client round two
pub const ROUND_LEN: usize = POINT_LEN + ZKP_LEN;
/// ECParameters prefix the server puts in front of its round two
pub const SERVER_ROUND2_PREFIX: [u8; 3] = [0x03, 0x00, 0x17];
/// Length of the raw shared secret
pub const SECRET_LEN: usize = 32;

const UNCOMPRESSED_LEN: usize = 65;

/// Which side of the exchange we are
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Central (app)
    Client,
    /// Pump
    Server,
}

impl Role {
    fn id(self) -> &'static [u8] {
        match self {
            Role::Client => b"client",
            Role::Server => b"server",
        }
    }

    fn peer(self) -> Role {
        match self {
            Role::Client => Role::Server,
            Role::Server => Role::Client,
        }
    }
}

/// Password scalar: the code bytes as a big-endian integer mod n
pub fn password_scalar(password: &[u8]) -> Scalar {
    let mut bytes = [0u8; 32];
    let len = password.len().min(32);
    bytes[32 - len..].copy_from_slice(&password[password.len() - len..]);
    <Scalar as Reduce<U256>>::reduce_bytes(&FieldBytes::from(bytes))
}

fn random_scalar() -> Scalar {
    let mut rng = rand::thread_rng();
    loop {
        let s = Scalar::random(&mut rng);
        if !bool::from(s.is_zero()) {
            return s;
        }
    }
}

fn encode_point(point: &ProjectivePoint) -> EncodedPoint {
    point.to_affine().to_encoded_point(false)
}

fn write_point(out: &mut Vec<u8>, point: &ProjectivePoint) {
    let encoded = encode_point(point);
    out.push(encoded.as_bytes().len() as u8);
    out.extend_from_slice(encoded.as_bytes());
}

fn zkp_hash(
    generator: &ProjectivePoint,
    v: &ProjectivePoint,
    x: &ProjectivePoint,
    id: &[u8],
) -> Scalar {
    let mut hasher = Sha256::new();
    for point in [generator, v, x] {
        let encoded = encode_point(point);
        hasher.update((encoded.as_bytes().len() as u32).to_be_bytes());
        hasher.update(encoded.as_bytes());
    }
    hasher.update((id.len() as u32).to_be_bytes());
    hasher.update(id);
    <Scalar as Reduce<U256>>::reduce_bytes(&hasher.finalize())
}

fn write_zkp(
    out: &mut Vec<u8>,
    generator: &ProjectivePoint,
    secret: &Scalar,
    public: &ProjectivePoint,
    id: &[u8],
) {
    let v = random_scalar();
    let v_pub = generator * &v;
    let h = zkp_hash(generator, &v_pub, public, id);
    let r = v - secret * &h;

    write_point(out, &v_pub);
    out.push(32);
    out.extend_from_slice(&r.to_repr());
}

/// Cursor over peer round data
struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], AuthError> {
        if self.data.len() < n {
            return Err(AuthError::Crypto(format!(
                "round data truncated: need {n} bytes, have {}",
                self.data.len()
            )));
        }
        let (head, tail) = self.data.split_at(n);
        self.data = tail;
        Ok(head)
    }

    fn point(&mut self) -> Result<ProjectivePoint, AuthError> {
        let len = self.take(1)?[0] as usize;
        if len != UNCOMPRESSED_LEN {
            return Err(AuthError::Crypto(format!("unsupported point length {len}")));
        }
        let encoded = EncodedPoint::from_bytes(self.take(len)?)
            .map_err(|e| AuthError::Crypto(format!("bad point encoding: {e}")))?;
        let affine = Option::<AffinePoint>::from(AffinePoint::from_encoded_point(&encoded))
            .ok_or_else(|| AuthError::Crypto("point not on curve".into()))?;
        let point = ProjectivePoint::from(affine);
        if point == ProjectivePoint::IDENTITY {
            return Err(AuthError::Crypto("identity point".into()));
        }
        Ok(point)
    }

    fn scalar(&mut self) -> Result<Scalar, AuthError> {
        let len = self.take(1)?[0] as usize;
        if len == 0 || len > 32 {
            return Err(AuthError::Crypto(format!("unsupported scalar length {len}")));
        }
        let mut bytes = [0u8; 32];
        bytes[32 - len..].copy_from_slice(self.take(len)?);
        Option::<Scalar>::from(Scalar::from_repr(FieldBytes::from(bytes)))
            .ok_or_else(|| AuthError::Crypto("scalar out of range".into()))
    }

    /// Read `X ‖ V ‖ r` and check the proof for X under `generator`
    fn proven_point(
        &mut self,
        generator: &ProjectivePoint,
        id: &[u8],
    ) -> Result<ProjectivePoint, AuthError> {
        let x = self.point()?;
        let v = self.point()?;
        let r = self.scalar()?;
        let h = zkp_hash(generator, &v, &x, id);
        if generator * &r + x * &h != v {
            return Err(AuthError::Crypto("zero-knowledge proof rejected".into()));
        }
        Ok(x)
    }
}

/// One participant's EC-JPAKE state
pub struct EcJpake {
    role: Role,
    password: Scalar,
    x1: Scalar,
    x2: Scalar,
    x1_pub: ProjectivePoint,
    x2_pub: ProjectivePoint,
    peer_x1_pub: Option<ProjectivePoint>,
    peer_x2_pub: Option<ProjectivePoint>,
    peer_round_two: Option<ProjectivePoint>,
}

impl std::fmt::Debug for EcJpake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EcJpake")
            .field("role", &self.role)
            .field("peer_round_one", &self.peer_x2_pub.is_some())
            .field("peer_round_two", &self.peer_round_two.is_some())
            .finish_non_exhaustive()
    }
}

impl EcJpake {
    /// Fresh ephemeral keys for `role`, bound to `password`
    pub fn new(role: Role, password: &[u8]) -> Self {
        let x1 = random_scalar();
        let x2 = random_scalar();
        Self {
            role,
            password: password_scalar(password),
            x1,
            x2,
            x1_pub: ProjectivePoint::GENERATOR * &x1,
            x2_pub: ProjectivePoint::GENERATOR * &x2,
            peer_x1_pub: None,
            peer_x2_pub: None,
            peer_round_two: None,
        }
    }

    /// Our role
    pub fn role(&self) -> Role {
        self.role
    }

    /// First half of round one: X1 with its proof
    pub fn round_one_first(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(ROUND_LEN);
        write_point(&mut out, &self.x1_pub);
        write_zkp(
            &mut out,
            &ProjectivePoint::GENERATOR,
            &self.x1,
            &self.x1_pub,
            self.role.id(),
        );
        out
    }

    /// Second half of round one: X2 with its proof
    pub fn round_one_second(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(ROUND_LEN);
        write_point(&mut out, &self.x2_pub);
        write_zkp(
            &mut out,
            &ProjectivePoint::GENERATOR,
            &self.x2,
            &self.x2_pub,
            self.role.id(),
        );
        out
    }

    /// Verify and store the peer's first round-one half
    pub fn read_round_one_first(&mut self, data: &[u8]) -> Result<(), AuthError> {
        let mut reader = Reader { data };
        let point = reader.proven_point(&ProjectivePoint::GENERATOR, self.role.peer().id())?;
        self.peer_x1_pub = Some(point);
        Ok(())
    }

    /// Verify and store the peer's second round-one half
    pub fn read_round_one_second(&mut self, data: &[u8]) -> Result<(), AuthError> {
        let mut reader = Reader { data };
        let point = reader.proven_point(&ProjectivePoint::GENERATOR, self.role.peer().id())?;
        self.peer_x2_pub = Some(point);
        Ok(())
    }

    fn peer_round_one(&self) -> Result<(ProjectivePoint, ProjectivePoint), AuthError> {
        match (self.peer_x1_pub, self.peer_x2_pub) {
            (Some(p1), Some(p2)) => Ok((p1, p2)),
            _ => Err(AuthError::Crypto("peer round one missing".into())),
        }
    }

    /// Round two: `(X1 + X3 + X4) * (x2 * s)` with its proof
    ///
    /// The server form carries the 3-byte ECParameters prefix.
    pub fn round_two(&self) -> Result<Vec<u8>, AuthError> {
        let (peer1, peer2) = self.peer_round_one()?;
        let generator = self.x1_pub + peer1 + peer2;
        let xm = self.x2 * &self.password;
        let public = generator * &xm;

        let mut out = Vec::with_capacity(SERVER_ROUND2_PREFIX.len() + ROUND_LEN);
        if self.role == Role::Server {
            out.extend_from_slice(&SERVER_ROUND2_PREFIX);
        }
        write_point(&mut out, &public);
        write_zkp(&mut out, &generator, &xm, &public, self.role.id());
        Ok(out)
    }

    /// Verify and store the peer's round two
    pub fn read_round_two(&mut self, data: &[u8]) -> Result<(), AuthError> {
        let (peer1, _) = self.peer_round_one()?;
        let data = match self.role.peer() {
            Role::Server => data
                .strip_prefix(&SERVER_ROUND2_PREFIX[..])
                .ok_or_else(|| AuthError::Crypto("missing ECParameters prefix".into()))?,
            Role::Client => data,
        };

        let generator = peer1 + self.x1_pub + self.x2_pub;
        let mut reader = Reader { data };
        let point = reader.proven_point(&generator, self.role.peer().id())?;
        self.peer_round_two = Some(point);
        Ok(())
    }

    /// SHA-256 of the x coordinate of the shared point
    pub fn derive_secret(&self) -> Result<[u8; SECRET_LEN], AuthError> {
        let (_, peer2) = self.peer_round_one()?;
        let peer_round_two = self
            .peer_round_two
            .ok_or_else(|| AuthError::Crypto("peer round two missing".into()))?;

        let xm = self.x2 * &self.password;
        let shared = (peer_round_two - peer2 * &xm) * &self.x2;
        if shared == ProjectivePoint::IDENTITY {
            return Err(AuthError::Crypto("degenerate shared point".into()));
        }

        let encoded = encode_point(&shared);
        let x = &encoded.as_bytes()[1..1 + 32];
        Ok(Sha256::digest(x).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(client_code: &[u8], server_code: &[u8]) -> (EcJpake, EcJpake) {
        let mut client = EcJpake::new(Role::Client, client_code);
        let mut server = EcJpake::new(Role::Server, server_code);

        server.read_round_one_first(&client.round_one_first()).unwrap();
        server.read_round_one_second(&client.round_one_second()).unwrap();
        client.read_round_one_first(&server.round_one_first()).unwrap();
        client.read_round_one_second(&server.round_one_second()).unwrap();

        let client_two = client.round_two().unwrap();
        let server_two = server.round_two().unwrap();
        server.read_round_two(&client_two).unwrap();
        client.read_round_two(&server_two).unwrap();
        (client, server)
    }

    #[test]
    fn test_round_lengths() {
        let client = EcJpake::new(Role::Client, b"123456");
        assert_eq!(ROUND_LEN, 165);
        assert_eq!(client.round_one_first().len(), ROUND_LEN);
        assert_eq!(client.round_one_second().len(), ROUND_LEN);
    }

    #[test]
    fn test_shared_secret_agrees() {
        let (client, server) = exchange(b"123456", b"123456");
        assert_eq!(client.derive_secret().unwrap(), server.derive_secret().unwrap());
        assert_eq!(client.round_two().unwrap().len(), ROUND_LEN);
        assert_eq!(server.round_two().unwrap().len(), ROUND_LEN + 3);
    }

    #[test]
    fn test_wrong_password_disagrees() {
        let (client, server) = exchange(b"123456", b"654321");
        assert_ne!(client.derive_secret().unwrap(), server.derive_secret().unwrap());
    }

    #[test]
    fn test_tampered_proof_rejected() {
        let client = EcJpake::new(Role::Client, b"123456");
        let mut server = EcJpake::new(Role::Server, b"123456");

        let mut round = client.round_one_first();
        let last = round.len() - 1;
        round[last] ^= 0x01;
        assert!(matches!(
            server.read_round_one_first(&round),
            Err(AuthError::Crypto(_))
        ));
    }

    #[test]
    fn test_wrong_participant_id_rejected() {
        // A client proof replayed as if it came from the server
        let a = EcJpake::new(Role::Client, b"123456");
        let mut b = EcJpake::new(Role::Client, b"123456");
        assert!(b.read_round_one_first(&a.round_one_first()).is_err());
    }

    #[test]
    fn test_round_two_requires_round_one() {
        let client = EcJpake::new(Role::Client, b"123456");
        assert!(client.round_two().is_err());
        assert!(client.derive_secret().is_err());
    }

    #[test]
    fn test_truncated_round() {
        let client = EcJpake::new(Role::Client, b"123456");
        let mut server = EcJpake::new(Role::Server, b"123456");
        let round = client.round_one_first();
        assert!(server.read_round_one_first(&round[..100]).is_err());
    }

    #[test]
    fn test_password_scalar() {
        assert_eq!(password_scalar(b"\x01"), Scalar::ONE);
        assert_ne!(password_scalar(b"123456"), password_scalar(b"123457"));
    }
}
