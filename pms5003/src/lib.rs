// frame layout from the Plantower PMS5003 datasheet:
// https://www.aqmd.gov/docs/default-source/aq-spec/resources-page/plantower-pms5003-manual_v2-3.pdf
// the PMSA003I speaks the same framing over I2C, the PMS5003 streams it over a
// 9600 baud UART.
use core::fmt;
use std::io;

/// Reads frames from anything that produces the sensor's UART byte stream.
#[derive(Debug)]
pub struct Pms5003<R> {
    port: R,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Reading {
    /// PM1.0 concentration in µg/m³, standard particle (CF=1).
    pub pm1_0_standard: u16,
    /// PM2.5 concentration in µg/m³, standard particle (CF=1).
    pub pm2_5_standard: u16,
    /// PM10.0 concentration in µg/m³, standard particle (CF=1).
    pub pm10_0_standard: u16,

    /// PM1.0 concentration in µg/m³, under atmospheric environment.
    pub pm1_0: u16,
    /// PM2.5 concentration in µg/m³, under atmospheric environment.
    pub pm2_5: u16,
    /// PM10.0 concentration in µg/m³, under atmospheric environment.
    pub pm10_0: u16,

    /// Number of particles with diameter >= 0.3 µm in 0.1L of air.
    pub particles_0_3um: u16,
    /// Number of particles with diameter >= 0.5 µm in 0.1L of air.
    pub particles_0_5um: u16,
    /// Number of particles with diameter >= 1.0 µm in 0.1L of air.
    pub particles_1_0um: u16,
    /// Number of particles with diameter >= 2.5 µm in 0.1L of air.
    pub particles_2_5um: u16,
    /// Number of particles with diameter >= 5.0 µm in 0.1L of air.
    pub particles_5_0um: u16,
    /// Number of particles with diameter >= 10.0 µm in 0.1L of air.
    pub particles_10_0um: u16,
}

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Checksum { sum: u16, checksum: u16 },
    BadLength(u16),
    /// Gave up looking for the start-of-frame magic.
    NoMagic,
}

pub const MAGIC: u16 = 0x424d;
pub const FRAME_LEN: usize = 32;

// the length field counts the data words and the checksum, but not the magic
// or the length field itself.
const DATA_LEN: u16 = (FRAME_LEN - 4) as u16;

// a full frame is 32 bytes; if we don't see the magic within a few frames'
// worth of garbage, the stream is probably not coming from a PMS5003.
const MAX_SYNC_BYTES: usize = FRAME_LEN * 4;

impl<R> Pms5003<R> {
    pub const fn new(port: R) -> Self {
        Self { port }
    }

    pub fn port_mut(&mut self) -> &mut R {
        &mut self.port
    }

    pub fn into_inner(self) -> R {
        self.port
    }
}

impl<R: io::Read> Pms5003<R> {
    /// Reads the next complete frame from the stream, skipping any bytes
    /// before the start-of-frame magic.
    pub fn read(&mut self) -> Result<Reading, Error> {
        let mut buf = [0u8; FRAME_LEN];
        self.sync(&mut buf)?;
        self.port.read_exact(&mut buf[2..]).map_err(Error::Io)?;
        parse(&buf)
    }

    fn sync(&mut self, buf: &mut [u8; FRAME_LEN]) -> Result<(), Error> {
        let [hi, lo] = MAGIC.to_be_bytes();
        let mut prev = None;
        for _ in 0..MAX_SYNC_BYTES {
            let mut byte = [0u8; 1];
            self.port.read_exact(&mut byte).map_err(Error::Io)?;
            if prev == Some(hi) && byte[0] == lo {
                buf[0] = hi;
                buf[1] = lo;
                return Ok(());
            }
            prev = Some(byte[0]);
        }
        Err(Error::NoMagic)
    }
}

/// Parses one complete frame, including the magic.
pub fn parse(buf: &[u8; FRAME_LEN]) -> Result<Reading, Error> {
    let word = |i: usize| u16::from_be_bytes([buf[i], buf[i + 1]]);

    if word(0) != MAGIC {
        return Err(Error::NoMagic);
    }

    let len = word(2);
    if len != DATA_LEN {
        return Err(Error::BadLength(len));
    }

    // last two bytes are the checksum so dont include them in the checksum.
    let sum = buf
        .iter()
        .take(FRAME_LEN - 2)
        .map(|&byte| byte as u16)
        .fold(0u16, u16::wrapping_add);
    let checksum = word(FRAME_LEN - 2);
    if sum != checksum {
        return Err(Error::Checksum { sum, checksum });
    }

    // bytes 28 and 29 are reserved.
    Ok(Reading {
        pm1_0_standard: word(4),
        pm2_5_standard: word(6),
        pm10_0_standard: word(8),

        pm1_0: word(10),
        pm2_5: word(12),
        pm10_0: word(14),

        particles_0_3um: word(16),
        particles_0_5um: word(18),
        particles_1_0um: word(20),
        particles_2_5um: word(22),
        particles_5_0um: word(24),
        particles_10_0um: word(26),
    })
}

// === impl Error ===

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(error) => write!(f, "error reading from serial port: {error}"),
            Self::Checksum { sum, checksum } => {
                write!(f, "checksum mismatch: sum {sum:#06x}, checksum {checksum:#06x}")
            }
            Self::BadLength(len) => write!(f, "unexpected frame length {len}"),
            Self::NoMagic => f.write_str("no start-of-frame magic in stream"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(error) => Some(error),
            _ => None,
        }
    }
}

// === impl Reading ===

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PM1.0: {} µg/m³, PM2.5: {} µg/m³, PM10: {} µg/m³",
            self.pm1_0_standard, self.pm2_5_standard, self.pm10_0_standard
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(words: [u16; 13]) -> [u8; FRAME_LEN] {
        let mut buf = [0u8; FRAME_LEN];
        buf[..2].copy_from_slice(&MAGIC.to_be_bytes());
        buf[2..4].copy_from_slice(&DATA_LEN.to_be_bytes());
        for (i, word) in words.iter().enumerate() {
            let at = 4 + i * 2;
            buf[at..at + 2].copy_from_slice(&word.to_be_bytes());
        }
        let sum = buf[..FRAME_LEN - 2]
            .iter()
            .map(|&b| b as u16)
            .fold(0u16, u16::wrapping_add);
        buf[FRAME_LEN - 2..].copy_from_slice(&sum.to_be_bytes());
        buf
    }

    #[test]
    fn parses_fields_in_order() {
        let buf = frame([1, 2, 3, 4, 5, 6, 300, 200, 100, 50, 20, 10, 0]);
        let reading = parse(&buf).unwrap();
        assert_eq!(reading.pm1_0_standard, 1);
        assert_eq!(reading.pm2_5_standard, 2);
        assert_eq!(reading.pm10_0_standard, 3);
        assert_eq!(reading.pm1_0, 4);
        assert_eq!(reading.pm2_5, 5);
        assert_eq!(reading.pm10_0, 6);
        assert_eq!(reading.particles_0_3um, 300);
        assert_eq!(reading.particles_1_0um, 100);
        assert_eq!(reading.particles_10_0um, 10);
    }

    #[test]
    fn rejects_bad_checksum() {
        let mut buf = frame([7; 13]);
        buf[5] ^= 0xff;
        assert!(matches!(parse(&buf), Err(Error::Checksum { .. })));
    }

    #[test]
    fn rejects_bad_length() {
        let mut buf = frame([7; 13]);
        buf[3] = 20;
        assert!(matches!(parse(&buf), Err(Error::BadLength(20))));
    }

    #[test]
    fn resyncs_on_magic() {
        let buf = frame([9, 8, 7, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        // some garbage from the tail of a previous frame, including a lone
        // first magic byte.
        let mut stream = vec![0x00, 0x42, 0x13, 0x37];
        stream.extend_from_slice(&buf);
        let mut sensor = Pms5003::new(io::Cursor::new(stream));
        let reading = sensor.read().unwrap();
        assert_eq!(reading.pm1_0_standard, 9);
        assert_eq!(reading.pm10_0_standard, 7);
    }

    #[test]
    fn gives_up_without_magic() {
        let mut sensor = Pms5003::new(io::Cursor::new(vec![0u8; MAX_SYNC_BYTES + 8]));
        assert!(matches!(sensor.read(), Err(Error::NoMagic)));
    }

    #[test]
    fn truncated_stream_is_io_error() {
        let buf = frame([1; 13]);
        let mut sensor = Pms5003::new(io::Cursor::new(buf[..20].to_vec()));
        assert!(matches!(sensor.read(), Err(Error::Io(_))));
    }
}
