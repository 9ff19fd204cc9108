//! Mean sun angles from a Sentinel-2 tile metadata document.
//!
//! The L2A tile metadata (`metadata.xml`, MTD_TL) carries the scene-mean
//! solar geometry under `Tile_Angles/Mean_Sun_Angle`.

use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};

use crate::error::{CloudError, Result};
use crate::http::HttpClient;

/// Scene-mean solar azimuth and zenith, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SunAngles {
    pub azimuth: f64,
    pub zenith: f64,
}

#[derive(Clone, Copy, PartialEq)]
enum Field {
    None,
    Azimuth,
    Zenith,
}

/// Parse `Mean_Sun_Angle/AZIMUTH_ANGLE` and `ZENITH_ANGLE`.
///
/// Namespace prefixes are ignored. Angle elements outside `Mean_Sun_Angle`
/// (per-detector viewing angles) are skipped.
pub fn parse_sun_angles(xml: &str) -> Result<SunAngles> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut in_mean = false;
    let mut field = Field::None;
    let mut azimuth = None;
    let mut zenith = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"Mean_Sun_Angle" => in_mean = true,
                b"AZIMUTH_ANGLE" if in_mean => field = Field::Azimuth,
                b"ZENITH_ANGLE" if in_mean => field = Field::Zenith,
                _ => {}
            },
            Event::End(e) => {
                if e.local_name().as_ref() == b"Mean_Sun_Angle" {
                    in_mean = false;
                }
                field = Field::None;
            }
            Event::Text(t) if field != Field::None => {
                let text = t.unescape()?;
                let value: f64 = text
                    .trim()
                    .parse()
                    .map_err(|_| CloudError::Metadata(format!("bad sun angle '{}'", text)))?;
                match field {
                    Field::Azimuth => azimuth = Some(value),
                    Field::Zenith => zenith = Some(value),
                    Field::None => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
        if let (Some(azimuth), Some(zenith)) = (azimuth, zenith) {
            return Ok(SunAngles { azimuth, zenith });
        }
    }

    Err(CloudError::Metadata("Mean_Sun_Angle not found".into()))
}

/// Download a metadata document and parse its sun angles.
pub async fn fetch_sun_angles(client: &HttpClient, href: &str) -> Result<SunAngles> {
    let xml = client.get_text(href).await?;
    parse_sun_angles(&xml)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const MTD_TL: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<n1:Level-2A_Tile_ID xmlns:n1="https://psd-14.sentinel2.eo.esa.int/PSD/S2_PDI_Level-2A_Tile_Metadata.xsd">
  <n1:Geometric_Info>
    <Tile_Angles>
      <Sun_Angles_Grid>
        <Zenith><COL_STEP unit="m">5000</COL_STEP></Zenith>
      </Sun_Angles_Grid>
      <Mean_Sun_Angle>
        <ZENITH_ANGLE unit="deg">28.4731</ZENITH_ANGLE>
        <AZIMUTH_ANGLE unit="deg">122.907</AZIMUTH_ANGLE>
      </Mean_Sun_Angle>
      <Mean_Viewing_Incidence_Angle_List>
        <Mean_Viewing_Incidence_Angle bandId="0">
          <ZENITH_ANGLE unit="deg">5.1</ZENITH_ANGLE>
          <AZIMUTH_ANGLE unit="deg">280.0</AZIMUTH_ANGLE>
        </Mean_Viewing_Incidence_Angle>
      </Mean_Viewing_Incidence_Angle_List>
    </Tile_Angles>
  </n1:Geometric_Info>
</n1:Level-2A_Tile_ID>"#;

    #[test]
    fn parses_mean_sun_angle() {
        let angles = parse_sun_angles(MTD_TL).unwrap();
        assert_relative_eq!(angles.azimuth, 122.907);
        assert_relative_eq!(angles.zenith, 28.4731);
    }

    #[test]
    fn ignores_viewing_angles_outside_mean_block() {
        let xml = r#"<Tile_Angles>
            <Mean_Viewing_Incidence_Angle>
              <ZENITH_ANGLE>5.0</ZENITH_ANGLE><AZIMUTH_ANGLE>1.0</AZIMUTH_ANGLE>
            </Mean_Viewing_Incidence_Angle>
        </Tile_Angles>"#;
        assert!(matches!(parse_sun_angles(xml), Err(CloudError::Metadata(_))));
    }

    #[test]
    fn rejects_non_numeric_angle() {
        let xml = "<Mean_Sun_Angle><ZENITH_ANGLE>high</ZENITH_ANGLE></Mean_Sun_Angle>";
        assert!(parse_sun_angles(xml).is_err());
    }
}
