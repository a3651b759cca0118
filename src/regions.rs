//! Registro estático de países con coordenadas para el globo.

/// País conocido por el servicio.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
    pub code: &'static str,
    pub name: &'static str,
    pub latitude: f64,
    pub longitude: f64,
    pub flag: &'static str,
}

macro_rules! region {
    ($code:literal, $name:literal, $lat:literal, $lon:literal, $flag:literal) => {
        Region { code: $code, name: $name, latitude: $lat, longitude: $lon, flag: $flag }
    };
}

pub const REGIONS: &[Region] = &[
    region!("US", "United States", 37.0902, -95.7129, "🇺🇸"),
    region!("GB", "United Kingdom", 55.3781, -3.436, "🇬🇧"),
    region!("DE", "Germany", 51.1657, 10.4515, "🇩🇪"),
    region!("FR", "France", 46.2276, 2.2137, "🇫🇷"),
    region!("ES", "Spain", 40.4637, -3.7492, "🇪🇸"),
    region!("IT", "Italy", 41.8719, 12.5674, "🇮🇹"),
    region!("BR", "Brazil", -14.235, -51.9253, "🇧🇷"),
    region!("MX", "Mexico", 23.6345, -102.5528, "🇲🇽"),
    region!("CA", "Canada", 56.1304, -106.3468, "🇨🇦"),
    region!("AU", "Australia", -25.2744, 133.7751, "🇦🇺"),
    region!("JP", "Japan", 36.2048, 138.2529, "🇯🇵"),
    region!("TW", "Taiwan", 23.6978, 120.9605, "🇹🇼"),
    region!("IN", "India", 20.5937, 78.9629, "🇮🇳"),
    region!("SE", "Sweden", 60.1282, 18.6435, "🇸🇪"),
    region!("NO", "Norway", 60.472, 8.4689, "🇳🇴"),
    region!("NL", "Netherlands", 52.1326, 5.2913, "🇳🇱"),
    region!("PL", "Poland", 51.9194, 19.1451, "🇵🇱"),
    region!("AR", "Argentina", -38.4161, -63.6167, "🇦🇷"),
    region!("CL", "Chile", -35.6751, -71.543, "🇨🇱"),
    region!("CO", "Colombia", 4.5709, -74.2973, "🇨🇴"),
    region!("TH", "Thailand", 15.87, 100.9925, "🇹🇭"),
    region!("SG", "Singapore", 1.3521, 103.8198, "🇸🇬"),
    region!("MY", "Malaysia", 4.2105, 101.9758, "🇲🇾"),
    region!("PH", "Philippines", 12.8797, 121.774, "🇵🇭"),
    region!("TR", "Turkey", 38.9637, 35.2433, "🇹🇷"),
    region!("ZA", "South Africa", -30.5595, 22.9375, "🇿🇦"),
    region!("NZ", "New Zealand", -40.9006, 174.886, "🇳🇿"),
    region!("FI", "Finland", 61.9241, 25.7482, "🇫🇮"),
    region!("DK", "Denmark", 56.2639, 9.5018, "🇩🇰"),
    region!("PT", "Portugal", 39.3999, -8.2245, "🇵🇹"),
    region!("GR", "Greece", 39.0742, 21.8243, "🇬🇷"),
    region!("IE", "Ireland", 53.4129, -8.2439, "🇮🇪"),
    region!("AT", "Austria", 47.5162, 14.5501, "🇦🇹"),
    region!("CH", "Switzerland", 46.8182, 8.2275, "🇨🇭"),
    region!("BE", "Belgium", 50.5039, 4.4699, "🇧🇪"),
    region!("CZ", "Czech Republic", 49.8175, 15.473, "🇨🇿"),
    region!("HU", "Hungary", 47.1625, 19.5033, "🇭🇺"),
    region!("RO", "Romania", 45.9432, 24.9668, "🇷🇴"),
    region!("ID", "Indonesia", -0.7893, 113.9213, "🇮🇩"),
    region!("VN", "Vietnam", 14.0583, 108.2772, "🇻🇳"),
];

/// Busca un país por código (sin distinguir mayúsculas).
pub fn find(code: &str) -> Option<&'static Region> {
    REGIONS.iter().find(|r| r.code.eq_ignore_ascii_case(code))
}
