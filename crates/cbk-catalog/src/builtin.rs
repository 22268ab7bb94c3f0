//! Built-in shop dataset.
//!
//! Ids match the ERP product ids so sales and purchase rows join without a
//! translation layer. YAML overrides layered by `loader` replace whole
//! sections of this dataset.

use std::collections::BTreeMap;

use cbk_schemas::{MaterialId, ProductId, Vessel};

use crate::{Catalog, DecompositionRule, FieldSpec, Product, RawMaterial, WastageState, Zone};

fn mm(pairs: &[(u32, f64)]) -> BTreeMap<MaterialId, f64> {
    pairs.iter().map(|&(id, v)| (MaterialId(id), v)).collect()
}

fn material(name: &str, code: &str, uom: &str) -> RawMaterial {
    RawMaterial {
        name: name.to_string(),
        code: code.to_string(),
        uom: uom.to_string(),
    }
}

fn product(name: &str, code: &str, price: f64, materials: &[(u32, f64)]) -> Product {
    Product {
        name: name.to_string(),
        code: code.to_string(),
        price,
        materials: mm(materials),
    }
}

fn field(rule: DecompositionRule) -> FieldSpec {
    FieldSpec {
        rule,
        aliases: Vec::new(),
        overrides: None,
        zone: None,
        products: Vec::new(),
    }
}

fn direct(material: u32) -> DecompositionRule {
    DecompositionRule::Direct {
        material: MaterialId(material),
    }
}

impl FieldSpec {
    fn zoned(mut self, zone: &str) -> Self {
        self.zone = Some(zone.to_string());
        self
    }

    fn affects(mut self, products: &[u32]) -> Self {
        self.products = products.iter().map(|&p| ProductId(p)).collect();
        self
    }

    fn alias(mut self, name: &str) -> Self {
        self.aliases.push(name.to_string());
        self
    }

    fn supersedes(mut self, direct_field: &str) -> Self {
        self.overrides = Some(direct_field.to_string());
        self
    }
}

impl Catalog {
    pub fn builtin() -> Catalog {
        // Raw materials
        let materials: BTreeMap<MaterialId, RawMaterial> = [
            (1095, material("Buffalo Milk", "RM-BFM", "L")),
            (1096, material("Skimmed Milk Powder", "RM-SMP", "kg")),
            (1097, material("Sugar", "RM-SUG", "kg")),
            (1098, material("Tea Powder", "RM-TEA", "kg")),
            (1101, material("Filter Water", "RM-WTR", "L")),
            (1104, material("Buns", "RM-BUN", "Units")),
            (1105, material("Osmania Biscuit (Loose)", "RM-OSMG", "Units")),
            (1106, material("Chicken Cutlet (Unfried)", "RM-CCT", "Units")),
            (1107, material("Bottled Water", "RM-BWR", "Units")),
            (1110, material("Osmania Biscuit Box", "RM-OSMN", "Units")),
            (1112, material("Condensed Milk", "RM-CM", "kg")),
            (1113, material("Samosa Raw", "RM-SAM", "Units")),
            (1114, material("Oil", "RM-OIL", "L")),
            (1116, material("Cheese Balls Raw", "RM-CHB", "Units")),
            (1119, material("Butter", "RM-BTR", "kg")),
            (1120, material("Coffee Powder", "RM-COF", "kg")),
            (1121, material("Lemon", "RM-LMN", "Units")),
            (1123, material("Honey", "RM-HNY", "kg")),
        ]
        .into_iter()
        .map(|(id, m)| (MaterialId(id), m))
        .collect();

        // Products with recipes (qty per unit sold)
        let products: BTreeMap<ProductId, Product> = [
            (
                1028,
                // 80ml cup: 60ml boiled milk + 20ml decoction
                product(
                    "Irani Chai",
                    "NCH-IC",
                    20.0,
                    &[
                        (1095, 0.05742),
                        (1096, 0.001435),
                        (1112, 0.001148),
                        (1098, 0.000112),
                        (1097, 0.000225),
                        (1101, 0.01966),
                    ],
                ),
            ),
            (
                1102,
                product(
                    "Nawabi Special Coffee",
                    "NCH-NSC",
                    30.0,
                    &[
                        (1095, 0.08613),
                        (1096, 0.002153),
                        (1112, 0.001723),
                        (1120, 0.002),
                        (1123, 0.005),
                    ],
                ),
            ),
            (
                1103,
                product(
                    "Lemon Tea",
                    "LT",
                    20.0,
                    &[(1098, 0.000449), (1097, 0.000899), (1101, 0.07865), (1121, 0.5)],
                ),
            ),
            (
                1029,
                product(
                    "Bun Maska",
                    "NCH-BM",
                    40.0,
                    &[(1104, 1.0), (1119, 0.05), (1097, 0.004)],
                ),
            ),
            (1118, product("Malai Bun", "NCH-MB", 30.0, &[(1104, 1.0)])),
            (
                1031,
                product("Chicken Cutlet", "NCH-CC", 25.0, &[(1106, 1.0), (1114, 0.03)]),
            ),
            (
                1115,
                product("Pyaaz Samosa", "NCH-PS", 15.0, &[(1113, 1.0), (1114, 0.02)]),
            ),
            (
                1117,
                product("Cheese Balls", "NCH-CB", 50.0, &[(1116, 1.0), (1114, 0.015)]),
            ),
            (1030, product("Osmania Biscuit", "NCH-OB", 8.0, &[(1105, 1.0)])),
            (
                1033,
                product("Osmania Biscuit Pack of 3", "NCH-OB3", 20.0, &[(1105, 3.0)]),
            ),
            (
                1111,
                product("Niloufer Osmania 500g", "NCH-OBBOX", 250.0, &[(1110, 1.0)]),
            ),
            (1094, product("Water", "NCH-WTR", 10.0, &[(1107, 1.0)])),
        ]
        .into_iter()
        .map(|(id, p)| (ProductId(id), p))
        .collect();

        // Per-litre mixture ratios.
        // Boiled milk batch: 10L buffalo milk + 0.25kg SMP + 0.2kg condensed
        // milk ≈ 10.45L of mixture.
        let boiled_milk_ratio = mm(&[(1095, 0.957), (1096, 0.02392), (1112, 0.01914)]);
        // Decoction batch: 70L water + 0.4kg tea + 0.8kg sugar ≈ 71.2L.
        let decoction_ratio = mm(&[(1098, 0.005618), (1097, 0.01124), (1101, 0.9831)]);

        let mut fields: BTreeMap<String, FieldSpec> = BTreeMap::new();

        // Direct raw materials
        for (name, id) in [
            ("raw_buffalo_milk", 1095),
            ("raw_condensed_milk", 1112),
            ("raw_smp", 1096),
            ("raw_sugar", 1097),
            ("raw_tea_powder", 1098),
            ("butter", 1119),
            ("coffee_powder", 1120),
            ("honey", 1123),
            ("lemons", 1121),
            ("oil", 1114),
            ("water_bottles", 1107),
        ] {
            fields.insert(name.to_string(), field(direct(id)).zoned("kitchen_storage"));
        }

        // Vessel-weight fields. The kitchen boiled-milk field carries the
        // superseded single-field name as an alias.
        fields.insert(
            "boiled_milk_kitchen".to_string(),
            field(DecompositionRule::VesselWeight {
                liquid: "boiled_milk".to_string(),
                ratios: boiled_milk_ratio.clone(),
            })
            .zoned("kitchen_storage")
            .alias("boiled_milk")
            .affects(&[1028, 1102]),
        );
        fields.insert(
            "boiled_milk_counter".to_string(),
            field(DecompositionRule::VesselWeight {
                liquid: "boiled_milk".to_string(),
                ratios: boiled_milk_ratio,
            })
            .zoned("counter")
            .affects(&[1028, 1102]),
        );
        fields.insert(
            "tea_decoction".to_string(),
            field(DecompositionRule::VesselWeight {
                liquid: "tea_decoction".to_string(),
                ratios: decoction_ratio,
            })
            .zoned("counter")
            .affects(&[1028, 1103]),
        );
        // Oil can be entered directly (litres) or weighed in its storage
        // vessel; the weighing wins when both are present.
        fields.insert(
            "oil_vessels".to_string(),
            field(DecompositionRule::VesselWeight {
                liquid: "oil".to_string(),
                ratios: mm(&[(1114, 1.0)]),
            })
            .zoned("kitchen_storage")
            .supersedes("oil"),
        );

        // Composite counts
        fields.insert(
            "tea_sugar_boxes".to_string(),
            field(DecompositionRule::CompositeCount {
                per_unit: mm(&[(1098, 0.4), (1097, 0.8)]),
            })
            .zoned("kitchen_storage"),
        );
        fields.insert(
            "osmania_packets".to_string(),
            field(DecompositionRule::CompositeCount {
                per_unit: mm(&[(1105, 24.0)]),
            })
            .zoned("kitchen_storage"),
        );

        // Counts on the counter / display
        fields.insert(
            "plain_buns".to_string(),
            field(direct(1104)).zoned("display").affects(&[1029, 1118]),
        );
        fields.insert(
            "osmania_loose".to_string(),
            field(direct(1105)).zoned("display").affects(&[1030, 1033]),
        );
        fields.insert(
            "niloufer_storage".to_string(),
            field(direct(1110)).zoned("kitchen_storage").alias("niloufer_boxes"),
        );
        fields.insert(
            "niloufer_display".to_string(),
            field(direct(1110)).zoned("display").affects(&[1111]),
        );

        // Prepared / fried items: base item plus the frying oil it absorbed.
        fields.insert(
            "raw_cutlets".to_string(),
            field(direct(1106)).zoned("cold_storage"),
        );
        fields.insert(
            "fried_cutlets".to_string(),
            field(DecompositionRule::PreparedItem {
                base: MaterialId(1106),
                extras: mm(&[(1114, 0.03)]),
            })
            .zoned("display")
            .affects(&[1031]),
        );
        fields.insert(
            "raw_samosa".to_string(),
            field(direct(1113)).zoned("cold_storage"),
        );
        fields.insert(
            "fried_samosa".to_string(),
            field(DecompositionRule::PreparedItem {
                base: MaterialId(1113),
                extras: mm(&[(1114, 0.02)]),
            })
            .zoned("display")
            .affects(&[1115]),
        );
        fields.insert(
            "raw_cheese_balls".to_string(),
            field(direct(1116)).zoned("cold_storage"),
        );
        fields.insert(
            "fried_cheese_balls".to_string(),
            field(DecompositionRule::PreparedItem {
                base: MaterialId(1116),
                extras: mm(&[(1114, 0.015)]),
            })
            .zoned("display")
            .affects(&[1117]),
        );
        fields.insert(
            "prepared_bun_maska".to_string(),
            field(DecompositionRule::PreparedItem {
                base: MaterialId(1104),
                extras: mm(&[(1119, 0.05), (1097, 0.004)]),
            })
            .zoned("display")
            .affects(&[1029]),
        );

        let zones: BTreeMap<String, Zone> = [
            ("counter", 600),
            ("display", 600),
            ("kitchen_storage", 1800),
            ("cold_storage", 3600),
        ]
        .into_iter()
        .map(|(name, secs)| {
            (
                name.to_string(),
                Zone {
                    gap_tolerance_secs: secs,
                },
            )
        })
        .collect();

        let densities: BTreeMap<String, f64> = [
            ("boiled_milk", 1.035),
            ("tea_decoction", 1.03),
            ("oil", 0.92),
            ("raw_milk", 1.032),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let wastage_states = vec![
            wstate("cutlet", "raw", &[(1106, 1.0)]),
            wstate("cutlet", "fried", &[(1106, 1.0), (1114, 0.03)]),
            wstate("samosa", "raw", &[(1113, 1.0)]),
            wstate("samosa", "fried", &[(1113, 1.0), (1114, 0.02)]),
            wstate("cheese_balls", "raw", &[(1116, 1.0)]),
            wstate("cheese_balls", "fried", &[(1116, 1.0), (1114, 0.015)]),
            wstate("bun", "plain", &[(1104, 1.0)]),
            wstate(
                "bun_maska",
                "prepared",
                &[(1104, 1.0), (1119, 0.05), (1097, 0.004)],
            ),
            wstate(
                "boiled_milk",
                "litre",
                &[(1095, 0.957), (1096, 0.02392), (1112, 0.01914)],
            ),
            wstate(
                "tea_decoction",
                "litre",
                &[(1098, 0.005618), (1097, 0.01124), (1101, 0.9831)],
            ),
        ];

        // Starting approximations; real tare weights are registered in the
        // DB after weighing each vessel empty.
        let default_vessels = vec![
            vessel("KIT-PATILA-1", "Kitchen Large Patila", "boiled_milk", "kitchen", 13.28),
            vessel("CTR-MILK-1", "Counter Milk Vessel (Copper Samawar)", "boiled_milk", "counter", 10.0),
            vessel("CTR-DEC-1", "Counter Decoction Vessel 1 (Copper)", "tea_decoction", "counter", 13.0),
            vessel("CTR-DEC-2", "Counter Decoction Vessel 2 (Copper)", "tea_decoction", "counter", 11.0),
            vessel("KIT-DEC-1", "Kitchen Decoction Prep Vessel", "tea_decoction", "kitchen", 11.0),
        ];

        let fallback_costs: BTreeMap<MaterialId, f64> = [
            (1095, 80.0),
            (1096, 310.0),
            (1097, 44.0),
            (1098, 500.0),
            (1101, 1.5),
            (1104, 8.0),
            (1105, 6.65),
            (1106, 15.0),
            (1107, 6.7),
            (1110, 173.0),
            (1112, 326.0),
            (1113, 8.0),
            (1114, 120.0),
            (1116, 10.0),
            (1119, 500.0),
            (1120, 1200.0),
            (1121, 5.0),
            (1123, 400.0),
        ]
        .into_iter()
        .map(|(id, c)| (MaterialId(id), c))
        .collect();

        Catalog {
            materials,
            products,
            fields,
            zones,
            densities,
            wastage_states,
            default_vessels,
            fallback_costs,
            token_product: Some(ProductId(1028)),
        }
    }
}

fn wstate(item: &str, state: &str, materials: &[(u32, f64)]) -> WastageState {
    WastageState {
        item: item.to_string(),
        state: state.to_string(),
        materials: mm(materials),
    }
}

fn vessel(code: &str, name: &str, liquid: &str, location: &str, tare_kg: f64) -> Vessel {
    Vessel {
        code: code.to_string(),
        name: name.to_string(),
        liquid_type: liquid.to_string(),
        location: location.to_string(),
        tare_kg,
    }
}
