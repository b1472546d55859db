//! Dealership record types

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Car brand. The dealership only sells one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Brand {
    #[default]
    #[serde(rename = "Volkswagen")]
    Volkswagen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CarModel {
    Golf,
    Polo,
    TCross,
}

impl CarModel {
    pub fn as_str(self) -> &'static str {
        match self {
            CarModel::Golf => "golf",
            CarModel::Polo => "polo",
            CarModel::TCross => "t_cross",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Color {
    Black,
    Blue,
    White,
    Red,
    Green,
}

impl Color {
    pub fn as_str(self) -> &'static str {
        match self {
            Color::Black => "black",
            Color::Blue => "blue",
            Color::White => "white",
            Color::Red => "red",
            Color::Green => "green",
        }
    }
}

/// A car on the lot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Car {
    #[serde(default)]
    pub brand: Brand,
    pub model: CarModel,
    pub color: Color,
    /// Odometer reading in kilometres
    pub kms: u32,
    pub year: i32,
    /// Asking price
    pub value: f64,
}

impl Car {
    pub fn new(model: CarModel, color: Color, kms: u32, year: i32, value: f64) -> Self {
        Self {
            brand: Brand::Volkswagen,
            model,
            color,
            kms,
            year,
            value,
        }
    }

    /// Whether two records describe the same physical vehicle.
    ///
    /// Price is ignored: the model tends to round or reformat it when echoing
    /// a car back as a tool argument.
    pub fn same_vehicle(&self, other: &Car) -> bool {
        self.model == other.model
            && self.color == other.color
            && self.kms == other.kms
            && self.year == other.year
    }
}

impl fmt::Display for Car {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Volkswagen {} {} ({}, {} km) {:.2}",
            self.model.as_str(),
            self.color.as_str(),
            self.year,
            self.kms,
            self.value
        )
    }
}

/// Available and out-of-stock cars. The two lists are disjoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inventory {
    pub availables: Vec<Car>,
    #[serde(default)]
    pub out_of_stock: Vec<Car>,
}

impl Inventory {
    pub fn find_available(&self, car: &Car) -> Option<&Car> {
        self.availables.iter().find(|c| c.same_vehicle(car))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestDriveStatus {
    Scheduled,
    Canceled,
    Done,
}

/// A booked test drive. Records are never removed; cancellation flips status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestDrive {
    pub code: u32,
    pub date: NaiveDateTime,
    pub car: Car,
    pub name: String,
    pub driver_licence: String,
    pub status: TestDriveStatus,
}

/// Stock the dealership opens with
pub fn initial_stock() -> Inventory {
    Inventory {
        availables: vec![
            Car::new(CarModel::Golf, Color::Black, 0, 2025, 35_000.0),
            Car::new(CarModel::Golf, Color::Blue, 0, 2025, 35_500.0),
            Car::new(CarModel::Polo, Color::White, 0, 2025, 25_000.0),
            Car::new(CarModel::Polo, Color::Red, 0, 2025, 25_500.0),
            Car::new(CarModel::TCross, Color::Black, 0, 2025, 33_000.0),
            Car::new(CarModel::Golf, Color::White, 14_867, 2023, 23_500.0),
            Car::new(CarModel::Polo, Color::Black, 58_276, 2020, 12_350.0),
            Car::new(CarModel::Polo, Color::Red, 9_239, 2022, 20_000.0),
            Car::new(CarModel::TCross, Color::Black, 67_890, 2024, 27_000.0),
        ],
        out_of_stock: Vec::new(),
    }
}
