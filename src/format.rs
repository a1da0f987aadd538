use std::{
    fmt,
    io::{self, Write},
};

use crate::merge::Stations;

/// A value scaled by 10, displayed with exactly one fractional digit
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tenths(pub i64);

impl fmt::Display for Tenths {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{}", abs / 10, abs % 10)
    }
}

/// Writes `{first=min/mean/max, second=min/mean/max, etc=min/mean/max}`, ordered by key.
/// No trailing newline.
pub fn write_stations(out: &mut impl Write, stations: &Stations) -> io::Result<()> {
    out.write_all(b"{")?;
    for (i, (name, v)) in stations.iter().enumerate() {
        if i > 0 {
            out.write_all(b", ")?;
        }
        out.write_all(name)?;
        write!(
            out,
            "={}/{}/{}",
            Tenths(v.min.into()),
            Tenths(v.mean()),
            Tenths(v.max.into())
        )?;
    }
    out.write_all(b"}")
}

/// [write_stations] into a `String`. Keys are utf-8 checked when first recorded.
pub fn format_stations(stations: &Stations) -> String {
    let mut out = Vec::with_capacity(stations.len() * 32 + 2);
    // writing into a Vec can't fail
    let _ = write_stations(&mut out, stations);
    String::from_utf8_lossy(&out).into_owned()
}
