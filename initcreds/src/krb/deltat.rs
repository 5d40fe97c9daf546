use crate::DeltaT;
use nom::{
    branch::alt,
    character::complete::{char, digit1, one_of},
    combinator::{all_consuming, map, map_res, opt, verify},
    multi::many1,
    sequence::{pair, preceded, tuple},
    IResult,
};

// Duration strings of the configuration file: bare seconds, `NdNhNmNs`
// combinations, or clock notation `hh:mm[:ss]`.

fn number(input: &str) -> IResult<&str, i64> {
    map_res(digit1, str::parse)(input)
}

fn clock(input: &str) -> IResult<&str, i64> {
    map(
        tuple((
            number,
            preceded(char(':'), number),
            opt(preceded(char(':'), number)),
        )),
        |(hours, minutes, seconds)| hours * 3600 + minutes * 60 + seconds.unwrap_or(0),
    )(input)
}

fn terms(input: &str) -> IResult<&str, i64> {
    map(
        verify(many1(pair(number, opt(one_of("dhms")))), |parts: &Vec<_>| {
            // a bare number is only valid as the trailing term
            parts
                .iter()
                .enumerate()
                .all(|(i, (_, unit))| unit.is_some() || i + 1 == parts.len())
        }),
        |parts| {
            parts
                .iter()
                .map(|(value, unit)| {
                    let scale = match unit {
                        Some('d') => 86400,
                        Some('h') => 3600,
                        Some('m') => 60,
                        _ => 1,
                    };
                    value.saturating_mul(scale)
                })
                .fold(0i64, i64::saturating_add)
        },
    )(input)
}

pub fn string_to_deltat(text: &str) -> anyhow::Result<DeltaT> {
    let trimmed = text.trim();
    let (negative, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };
    let (_, mut seconds) = all_consuming(alt((clock, terms)))(body)
        .map_err(|_| anyhow::anyhow!("Invalid time duration: {}", text))?;
    if negative {
        seconds = -seconds;
    }
    Ok(seconds.clamp(DeltaT::MIN as i64, DeltaT::MAX as i64) as DeltaT)
}
