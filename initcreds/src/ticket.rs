use crate::{Enctype, NameType, Principal};
use der_parser::{
    asn1_rs::{self, Any, CheckDerConstraints, DerAutoDerive, FromDer},
    ber::{BerObject, BerObjectContent},
    der::{
        parse_der_generalstring, parse_der_i32, parse_der_octetstring, parse_der_sequence,
        parse_der_u32, Tag,
    },
};

pub type Kvno = u32;

/// The ticket as handed back by the KDC. Only the outer shell is visible to
/// the client; the encrypted part stays opaque.
#[derive(Debug, Clone)]
pub struct Ticket {
    pub server: Principal,
    pub enc_part: EncData,
}

#[derive(Debug, Clone)]
pub struct EncData {
    pub enctype: Enctype,
    pub kvno: Option<Kvno>,
    pub ciphertext: Vec<u8>,
}

// The fields of a Ticket are wrapped in explicit context tags; der-parser
// surfaces those as Unknown content holding the inner encoding.
fn explicit<'a>(obj: &'a BerObject) -> Result<&'a [u8], asn1_rs::Error> {
    match &obj.content {
        BerObjectContent::Unknown(content) => Ok(content.data),
        _ => Err(asn1_rs::Error::BerValueError),
    }
}

fn parse_principal_name(data: &[u8], realm: &[u8]) -> Result<Principal, asn1_rs::Error> {
    let (_, seq) = parse_der_sequence(data)?;
    let seq = seq.as_sequence()?;
    if seq.len() != 2 {
        Err(asn1_rs::Error::BerValueError)?
    }

    let (_, name_type) = parse_der_i32(explicit(&seq[0])?)?;

    let (_, components) = parse_der_sequence(explicit(&seq[1])?)?;
    let mut principal_components = vec![];
    for component in components.as_sequence()? {
        principal_components.push(component.as_str()?.as_bytes().to_owned());
    }

    Ok(Principal {
        realm: realm.to_owned(),
        components: principal_components,
        name_type: NameType(name_type),
    })
}

fn parse_encrypted_data(data: &[u8]) -> Result<EncData, asn1_rs::Error> {
    let (_, seq) = parse_der_sequence(data)?;
    let seq = seq.as_sequence()?;
    if seq.len() != 2 && seq.len() != 3 {
        Err(asn1_rs::Error::BerValueError)?
    }

    let (_, enctype) = parse_der_i32(explicit(&seq[0])?)?;

    let kvno = if seq.len() == 3 {
        let (_, kvno) = parse_der_u32(explicit(&seq[1])?)?;
        Some(kvno)
    } else {
        None
    };

    let (_, ciphertext) = parse_der_octetstring(explicit(&seq[seq.len() - 1])?)?;
    let ciphertext = match ciphertext.content {
        BerObjectContent::OctetString(content) => content.to_owned(),
        _ => Err(asn1_rs::Error::BerValueError)?,
    };

    Ok(EncData {
        enctype: Enctype(enctype),
        kvno,
        ciphertext,
    })
}

impl<'a> TryFrom<Any<'a>> for Ticket {
    type Error = asn1_rs::Error;

    fn try_from(any: Any) -> Result<Self, Self::Error> {
        let (_, seq) = parse_der_sequence(any.data)?;
        let seq = seq.as_sequence()?;
        if seq.len() != 4 {
            Err(asn1_rs::Error::BerValueError)?
        }

        let (_, _version) = parse_der_i32(explicit(&seq[0])?)?;

        let (_, realm) = parse_der_generalstring(explicit(&seq[1])?)?;
        let realm = realm.as_str()?.as_bytes().to_owned();

        let server = parse_principal_name(explicit(&seq[2])?, &realm)?;
        let enc_part = parse_encrypted_data(explicit(&seq[3])?)?;

        Ok(Ticket { server, enc_part })
    }
}

impl CheckDerConstraints for Ticket {
    fn check_constraints(any: &Any) -> asn1_rs::Result<()> {
        any.header.assert_class(asn1_rs::Class::Application)?;
        any.header.assert_constructed()?;
        any.header.assert_tag(Tag::Boolean)?;
        Ok(())
    }
}

impl DerAutoDerive for Ticket {}

impl Ticket {
    pub fn decode_from(data: &[u8]) -> anyhow::Result<Self> {
        let (_, ticket) = Self::from_der(data)?;
        Ok(ticket)
    }
}
