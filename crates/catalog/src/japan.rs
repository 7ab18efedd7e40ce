use crate::{
    BuiltinOverlay, DataBand, Label, OverlayCatalog, OverlayDefinition, OverlayKind,
    OverlaySource,
};

/// Zoom level where urban areas switch from the coarse dataset to the
/// precomputed detailed one.
const URBAN_DETAIL_MINZOOM: f64 = 8.0;

const TERRARIUM_TILES: &str =
    "https://s3.amazonaws.com/elevation-tiles-prod/terrarium/{z}/{x}/{y}.png";

fn exclusive(key: &str, url: &str, ja: &str, en: &str) -> OverlayDefinition {
    OverlayDefinition::new(
        key,
        OverlayKind::Exclusive,
        OverlaySource::Remote {
            url: url.to_string(),
        },
        Label::new(ja, en),
    )
}

fn builtin(key: &str, template: BuiltinOverlay, ja: &str, en: &str) -> OverlayDefinition {
    OverlayDefinition::new(
        key,
        OverlayKind::Independent,
        OverlaySource::Builtin { template },
        Label::new(ja, en),
    )
}

fn population_circles(data_url: &str, stops: [[f64; 2]; 2], color: &str) -> BuiltinOverlay {
    BuiltinOverlay::PointMarkers {
        data_url: data_url.to_string(),
        label_property: "name".to_string(),
        value_property: Some("population".to_string()),
        radius_stops: stops.to_vec(),
        color: color.to_string(),
    }
}

fn population_extrusion(data_url: &str, color: &str) -> BuiltinOverlay {
    BuiltinOverlay::Extrusion {
        data_url: data_url.to_string(),
        height_property: "height".to_string(),
        color: color.to_string(),
    }
}

impl OverlayCatalog {
    /// The overlays shipped with the Japan viewer.
    pub fn japan() -> Self {
        let land_cover = Label::new("土地被覆情報", "Land cover");
        let land_use = Label::new("土地利用情報", "Land use");

        let definitions = vec![
            OverlayDefinition::none().with_section("landcover"),
            exclusive(
                "landcover1",
                "/landcover-style.json",
                "OpenStreetMap",
                "OpenStreetMap",
            )
            .with_scale_hint("～30km")
            .with_tooltip(land_cover.clone())
            .with_section("landcover"),
            exclusive(
                "landcover2",
                "/landcover2-style.json",
                "国土数値情報",
                "National Land Numerical Information",
            )
            .with_scale_hint("～30km")
            .with_tooltip(land_cover.clone())
            .with_section("landcover"),
            exclusive(
                "landcover3",
                "/landcover3-style.json",
                "ESA WorldCover",
                "ESA WorldCover",
            )
            .with_scale_hint("～30km")
            .with_tooltip(land_cover)
            .with_section("landcover"),
            exclusive(
                "landuse1",
                "/landuse1-style.json",
                "国土数値情報（詳細）",
                "National Land Numerical Information (detailed)",
            )
            .with_scale_hint("～100km")
            .with_tooltip(land_use.clone())
            .with_section("landuse"),
            exclusive(
                "landuse2",
                "/landuse2-style.json",
                "国土数値情報（簡易）",
                "National Land Numerical Information (simplified)",
            )
            .with_scale_hint("～100km")
            .with_tooltip(land_use.clone())
            .with_section("landuse"),
            exclusive(
                "landuse3",
                "/landuse3-style.json",
                "都市計画基礎調査",
                "Urban Planning Basic Survey",
            )
            .with_scale_hint("～1km")
            .with_tooltip(land_use)
            .with_section("landuse"),
            builtin(
                "urban",
                BuiltinOverlay::ZoomBanded {
                    bands: vec![
                        DataBand {
                            id: "coarse".to_string(),
                            data_url: "/urban-areas.json".to_string(),
                            minzoom: None,
                            maxzoom: Some(URBAN_DETAIL_MINZOOM),
                        },
                        DataBand {
                            id: "detail".to_string(),
                            data_url: "/urban-overlay.json".to_string(),
                            minzoom: Some(URBAN_DETAIL_MINZOOM),
                            maxzoom: None,
                        },
                    ],
                    fill_color: "#e57373".to_string(),
                    outline_color: "#c62828".to_string(),
                },
                "都市域（簡易）",
                "Urban areas (simplified)",
            )
            .with_scale_hint("～100km")
            .with_tooltip(Label::new(
                "国土数値情報（簡易）の広域用データのズームイン展開",
                "Zoomed-in expansion of the simplified wide-area dataset",
            ))
            .with_section("layers"),
            builtin(
                "prefectureCapitals",
                BuiltinOverlay::PointMarkers {
                    data_url: "/prefecture-capitals.geojson".to_string(),
                    label_property: "name".to_string(),
                    value_property: None,
                    radius_stops: Vec::new(),
                    color: "#1565c0".to_string(),
                },
                "都道府県庁舎",
                "Prefectural offices",
            )
            .with_scale_hint("全域")
            .with_tooltip(Label::new(
                "47都道府県の県庁所在地",
                "Seats of the 47 prefectural governments",
            ))
            .with_section("layers"),
            builtin(
                "terrain",
                BuiltinOverlay::Terrain {
                    tiles_url: TERRARIUM_TILES.to_string(),
                    encoding: "terrarium".to_string(),
                    tile_size: 256,
                },
                "標高表現",
                "Elevation shading",
            )
            .with_scale_hint("全域")
            .with_tooltip(Label::new(
                "標高データに基づく陰影起伏表現",
                "Hillshade derived from elevation data",
            ))
            .with_section("layers"),
            OverlayDefinition::new(
                "tileBoundaries",
                OverlayKind::Independent,
                OverlaySource::Flag,
                Label::new("タイル境界表示（Zoom/X/Y）", "Tile boundaries (Zoom/X/Y)"),
            )
            .with_scale_hint("全域")
            .with_tooltip(Label::new("データ境界", "Data boundaries"))
            .with_section("layers"),
            builtin(
                "populationPrefecture",
                population_circles(
                    "/population-prefecture-circle.json",
                    [[500_000.0, 6.0], [14_000_000.0, 40.0]],
                    "#fb8c00",
                ),
                "都道府県・円",
                "Prefectures (circles)",
            )
            .with_tooltip(Label::new(
                "都道府県別人口を円の大きさで表現",
                "Prefecture population as circle size",
            ))
            .with_section("population"),
            builtin(
                "populationPrefecture3d",
                population_extrusion("/population-prefecture-3d.json", "#fb8c00"),
                "都道府県・3D",
                "Prefectures (3D)",
            )
            .with_tooltip(Label::new(
                "都道府県別人口を3D円柱で表現",
                "Prefecture population as 3D columns",
            ))
            .with_section("population"),
            builtin(
                "populationCity",
                population_circles(
                    "/population-city-circle.json",
                    [[30_000.0, 3.0], [3_700_000.0, 24.0]],
                    "#8e24aa",
                ),
                "市区町村・円",
                "Municipalities (circles)",
            )
            .with_tooltip(Label::new(
                "主要都市の人口を円の大きさで表現",
                "Population of major cities as circle size",
            ))
            .with_section("population"),
            builtin(
                "populationCity3d",
                population_extrusion("/population-city-3d.json", "#8e24aa"),
                "市区町村・3D",
                "Municipalities (3D)",
            )
            .with_tooltip(Label::new(
                "主要都市の人口を3D円柱で表現",
                "Population of major cities as 3D columns",
            ))
            .with_section("population"),
        ];

        Self::index(definitions)
    }
}
