// ==========================================
// 测试数据构建器
// ==========================================
// 坐标约定: 工单位于 BASE，承包商按正北方向偏移 (1° 纬度 ≈ 69.09 英里)
// ==========================================

use contractor_dispatch::domain::contractor::GENERAL_SERVICE;
use contractor_dispatch::domain::types::{Availability, JobPriority};
use contractor_dispatch::domain::{Contractor, GeoPoint, Job};

pub const BASE: GeoPoint = GeoPoint { lat: 40.0, lon: -75.0 };

const MILES_PER_DEGREE_LAT: f64 = 69.09;

/// 正北 miles 英里处的坐标
pub fn north_of_base(miles: f64) -> GeoPoint {
    GeoPoint::new(BASE.lat + miles / MILES_PER_DEGREE_LAT, BASE.lon)
}

pub fn job(job_id: &str, service_type: &str) -> Job {
    Job::new(job_id, service_type, BASE, JobPriority::Scheduled)
}

pub struct ContractorBuilder {
    contractor: Contractor,
}

impl ContractorBuilder {
    pub fn new(contractor_id: &str) -> Self {
        Self {
            contractor: Contractor::new(contractor_id, BASE),
        }
    }

    pub fn miles_away(mut self, miles: f64) -> Self {
        self.contractor.location = north_of_base(miles);
        self
    }

    pub fn skills(mut self, skills: &[&str]) -> Self {
        self.contractor.specializations = skills.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn general(self) -> Self {
        self.skills(&[GENERAL_SERVICE])
    }

    pub fn rating(mut self, rating: f64) -> Self {
        self.contractor.rating = Some(rating);
        self
    }

    pub fn experience(mut self, completed_jobs: i64) -> Self {
        self.contractor.completed_jobs = completed_jobs;
        self
    }

    pub fn availability(mut self, availability: Availability) -> Self {
        self.contractor.availability = availability;
        self
    }

    pub fn capacity(mut self, current: i32, max: i32) -> Self {
        self.contractor.current_workload = current;
        self.contractor.max_concurrent_jobs = max;
        self
    }

    pub fn build(self) -> Contractor {
        self.contractor
    }
}

/// 三名候选: C1 ≈ 91 分, C2 ≈ 82 分, C3 = 45 分 (门槛 60 以下)
pub fn three_ranked_contractors(service_type: &str) -> Vec<Contractor> {
    vec![
        ContractorBuilder::new("C1")
            .skills(&[service_type])
            .rating(5.0)
            .experience(50)
            .build(),
        ContractorBuilder::new("C2")
            .miles_away(5.0)
            .skills(&[service_type])
            .rating(4.0)
            .experience(10)
            .build(),
        ContractorBuilder::new("C3")
            .miles_away(20.0)
            .general()
            .rating(1.0)
            .availability(Availability::Busy)
            .capacity(1, 2)
            .build(),
    ]
}
